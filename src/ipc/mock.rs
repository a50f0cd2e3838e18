//! In-process stand-in for the indexing service.
//!
//! [`MockService`] plays both sides a [`Connection`](super::Connection) needs:
//! it locates like a registered window and answers requests through the real
//! service-side codec. Every clone shares the same state, so a test keeps one
//! handle for control and hands clones to the connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::ipc::codec::{decode_request, encode_reply, ReplyFrame, ReplyItem, RequestFrame};
use crate::ipc::locator::{Endpoint, EndpointLocator};
use crate::ipc::protocol::{command, ResultFields, ServiceVersion};
use crate::ipc::transport::Transport;
use crate::{QixError, Result};

const ENDPOINT_BASE: isize = 0x5158_0000;

/// What the fake service does with one request.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with these records and total match count
    Items { total: u32, items: Vec<ReplyItem> },
    /// Answer with arbitrary bytes
    Raw(Vec<u8>),
    /// The service window is destroyed mid-call; a restarted service
    /// registers a new one
    Lost,
    /// Answer after a delay; longer than the request timeout means no answer
    Delay(Duration, Box<MockReply>),
}

/// What crossed the fake wire, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Request { token: u64, text: String },
    Reply { token: u64 },
    Command { command: u32, param: usize },
}

type Handler = dyn Fn(&RequestFrame) -> MockReply + Send + Sync;

struct State {
    registered: bool,
    generation: isize,
    events: Vec<WireEvent>,
    database_loaded: bool,
    indexed: ResultFields,
    version: ServiceVersion,
}

struct Inner {
    identifier: String,
    state: Mutex<State>,
    handler: Mutex<Arc<Handler>>,
    locate_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Scriptable fake service.
#[derive(Clone)]
pub struct MockService {
    inner: Arc<Inner>,
}

impl MockService {
    /// Registered service answering every request with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&RequestFrame) -> MockReply + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                identifier: "QIX_MOCK_SERVICE".to_string(),
                state: Mutex::new(State {
                    registered: true,
                    generation: 0,
                    events: Vec::new(),
                    database_loaded: true,
                    indexed: ResultFields::NAME | ResultFields::PATH,
                    version: ServiceVersion {
                        major: 1,
                        minor: 5,
                        revision: 0,
                        build: 1384,
                        target_machine: 2,
                    },
                }),
                handler: Mutex::new(Arc::new(handler)),
                locate_calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Service whose index holds exactly `names` under `C:\data`, in that
    /// order. Every query matches all of them; offset and max count apply.
    pub fn with_files(names: &[&str]) -> Self {
        let items: Vec<ReplyItem> = names
            .iter()
            .map(|name| ReplyItem::file("C:\\data", *name))
            .collect();
        Self::new(move |frame| {
            let page = items
                .iter()
                .skip(frame.offset as usize)
                .take(frame.max_count as usize)
                .cloned()
                .collect();
            MockReply::Items {
                total: items.len() as u32,
                items: page,
            }
        })
    }

    /// Replace the request handler.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&RequestFrame) -> MockReply + Send + Sync + 'static,
    {
        *self.inner.handler.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(handler);
    }

    /// Stop answering lookups; existing endpoints die.
    pub fn unregister(&self) {
        let mut state = self.state();
        state.registered = false;
        state.generation += 1;
    }

    /// Register again under a fresh endpoint.
    pub fn register(&self) {
        let mut state = self.state();
        state.registered = true;
        state.generation += 1;
    }

    /// Simulate a service restart: old endpoints die, a new one appears.
    pub fn restart(&self) {
        self.state().generation += 1;
    }

    pub fn set_database_loaded(&self, loaded: bool) {
        self.state().database_loaded = loaded;
    }

    pub fn set_indexed_fields(&self, fields: ResultFields) {
        self.state().indexed = fields;
    }

    pub fn set_version(&self, version: ServiceVersion) {
        self.state().version = version;
    }

    /// Number of endpoint lookups performed so far.
    pub fn locate_calls(&self) -> usize {
        self.inner.locate_calls.load(Ordering::SeqCst)
    }

    /// Most requests ever on the wire at once.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<WireEvent> {
        self.state().events.clone()
    }

    /// Endpoint currently registered, if any.
    pub fn current_endpoint(&self) -> Option<Endpoint> {
        let state = self.state();
        state
            .registered
            .then(|| Endpoint::from_raw(ENDPOINT_BASE + state.generation))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_alive(&self, endpoint: Endpoint) -> Result<()> {
        if self.current_endpoint() == Some(endpoint) {
            Ok(())
        } else {
            Err(QixError::EndpointLost(format!(
                "Mock endpoint {:#x} no longer exists",
                endpoint.raw()
            )))
        }
    }

    fn answer(&self, frame: &RequestFrame, reply: MockReply, timeout: Duration) -> Result<Vec<u8>> {
        match reply {
            MockReply::Items { total, items } => {
                Ok(encode_reply(&ReplyFrame::for_request(frame, total, items)))
            }
            MockReply::Raw(bytes) => Ok(bytes),
            MockReply::Lost => {
                self.restart();
                Err(QixError::EndpointLost("Mock service vanished".to_string()))
            }
            MockReply::Delay(delay, next) => {
                if delay >= timeout {
                    std::thread::sleep(timeout);
                    return Err(QixError::Timeout(timeout));
                }
                std::thread::sleep(delay);
                self.answer(frame, *next, timeout - delay)
            }
        }
    }
}

impl EndpointLocator for MockService {
    fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    fn locate(&self) -> Result<Endpoint> {
        self.inner.locate_calls.fetch_add(1, Ordering::SeqCst);
        self.current_endpoint()
            .ok_or_else(|| QixError::ServiceUnavailable(self.inner.identifier.clone()))
    }

    fn is_alive(&self, endpoint: Endpoint) -> bool {
        self.current_endpoint() == Some(endpoint)
    }
}

impl Transport for MockService {
    fn send(&self, endpoint: Endpoint, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.check_alive(endpoint)?;
        let frame = decode_request(request)
            .map_err(|e| QixError::Transport(format!("Mock service rejected request: {}", e)))?;

        self.state().events.push(WireEvent::Request {
            token: frame.token,
            text: frame.text.clone(),
        });
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // Handler runs without any lock held so it may call back into the mock
        let handler = Arc::clone(&self.inner.handler.lock().unwrap_or_else(|e| e.into_inner()));
        let result = self.answer(&frame, (*handler)(&frame), timeout);

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        if result.is_ok() {
            self.state().events.push(WireEvent::Reply { token: frame.token });
        }
        result
    }

    fn command(&self, endpoint: Endpoint, cmd: u32, param: usize, _timeout: Duration) -> Result<u32> {
        self.check_alive(endpoint)?;
        let mut state = self.state();
        state.events.push(WireEvent::Command { command: cmd, param });

        let answer = match cmd {
            command::GET_MAJOR_VERSION => state.version.major,
            command::GET_MINOR_VERSION => state.version.minor,
            command::GET_REVISION => state.version.revision,
            command::GET_BUILD_NUMBER => state.version.build,
            command::GET_TARGET_MACHINE => state.version.target_machine,
            command::IS_DB_LOADED => u32::from(state.database_loaded),
            command::IS_FIELD_INDEXED => {
                let field = ResultFields::from_bits_truncate(param as u32);
                u32::from(!field.is_empty() && state.indexed.contains(field))
            }
            _ => 0,
        };
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::codec::{decode_reply, encode_request};
    use crate::ipc::protocol::SearchRequest;

    #[test]
    fn test_restart_changes_endpoint() {
        let service = MockService::with_files(&[]);
        let before = service.locate().unwrap();
        service.restart();
        let after = service.locate().unwrap();

        assert_ne!(before, after);
        assert!(!service.is_alive(before));
        assert_eq!(service.locate_calls(), 2);
    }

    #[test]
    fn test_send_to_dead_endpoint_is_lost() {
        let service = MockService::with_files(&["a"]);
        let endpoint = service.locate().unwrap();
        service.unregister();

        let request = SearchRequest::new("a").unwrap();
        let err = service
            .send(endpoint, &encode_request(&request), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, QixError::EndpointLost(_)));
    }

    #[test]
    fn test_pages_through_files() {
        let service = MockService::with_files(&["a", "b", "c"]);
        let endpoint = service.locate().unwrap();
        let request = SearchRequest::builder("*")
            .offset(1)
            .max_count(1)
            .build()
            .unwrap();

        let reply = service
            .send(endpoint, &encode_request(&request), Duration::from_secs(1))
            .unwrap();
        let response = decode_reply(&reply, &request).unwrap();
        assert_eq!(response.total_matches, 3);
        assert_eq!(response.records[0].name.as_deref(), Some("b"));
        assert!(response.has_more());
    }
}
