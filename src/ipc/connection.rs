//! Connection to the indexing service.
//!
//! A [`Connection`] holds one resolved endpoint and runs exchanges one at a
//! time: concurrent callers queue on an internal gate, so two requests never
//! interleave on the wire. Loss of the endpoint drops it and the next call
//! looks the service up again.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::ipc::codec;
use crate::ipc::locator::{Endpoint, EndpointCache, EndpointLocator};
use crate::ipc::protocol::{
    command, ResultFields, SearchRequest, SearchResponse, ServiceVersion, DEFAULT_TIMEOUT,
};
use crate::ipc::transport::Transport;
use crate::Result;

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No endpoint held; the next call resolves one
    Disconnected,
    /// Endpoint held, idle
    Ready,
    /// An exchange is on the wire
    Querying,
}

struct Session {
    endpoint: Option<Endpoint>,
}

/// Serialized request/reply channel to the service.
pub struct Connection<L, T> {
    cache: Arc<EndpointCache<L>>,
    transport: T,
    gate: Mutex<Session>,
    state: Mutex<ConnectionState>,
    command_timeout: Duration,
}

impl<L: EndpointLocator, T: Transport> Connection<L, T> {
    /// New connection with its own endpoint cache. Nothing is resolved yet.
    pub fn new(locator: L, transport: T) -> Self {
        Self::with_cache(Arc::new(EndpointCache::new(locator)), transport)
    }

    /// New connection sharing `cache` with other connections.
    pub fn with_cache(cache: Arc<EndpointCache<L>>, transport: T) -> Self {
        Self {
            cache,
            transport,
            gate: Mutex::new(Session { endpoint: None }),
            state: Mutex::new(ConnectionState::Disconnected),
            command_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Deadline for scalar commands (version, status).
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve the endpoint now instead of on the first query.
    ///
    /// # Errors
    /// `ServiceUnavailable` if the service is not registered.
    pub fn connect(&self) -> Result<()> {
        let mut session = self.lock_gate();
        self.ensure_endpoint(&mut session).map(|_| ())
    }

    /// Drop the endpoint reference. The service is not notified.
    pub fn disconnect(&self) {
        let mut session = self.lock_gate();
        if let Some(endpoint) = session.endpoint.take() {
            tracing::debug!("Disconnecting from endpoint {:#x}", endpoint.raw());
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Whether the service can currently be located.
    pub fn is_service_available(&self) -> bool {
        self.cache.resolve().is_ok()
    }

    /// Run a search and decode the reply.
    ///
    /// # Errors
    /// `ServiceUnavailable`, `EndpointLost`, `Timeout`, `ProtocolMismatch`,
    /// `CorruptReply` or `Transport`. The first three and `ProtocolMismatch`
    /// leave the connection disconnected where the endpoint is at fault.
    pub fn query(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let token = request.correlation_token();
        self.exchange(|endpoint| {
            let started = Instant::now();
            let bytes = codec::encode_request(request);
            tracing::debug!(
                token,
                "Sending query '{}' ({} bytes, offset {}, max {})",
                request.text(),
                bytes.len(),
                request.offset(),
                request.max_count()
            );

            let reply = self.transport.send(endpoint, &bytes, request.timeout())?;
            let response = codec::decode_reply(&reply, request)?;
            tracing::debug!(
                token,
                "Query returned {} of {} matches in {:?}",
                response.len(),
                response.total_matches,
                started.elapsed()
            );
            Ok(response)
        })
    }

    /// Version of the running service.
    pub fn version(&self) -> Result<ServiceVersion> {
        self.exchange(|endpoint| {
            let ask = |cmd| self.transport.command(endpoint, cmd, 0, self.command_timeout);
            Ok(ServiceVersion {
                major: ask(command::GET_MAJOR_VERSION)?,
                minor: ask(command::GET_MINOR_VERSION)?,
                revision: ask(command::GET_REVISION)?,
                build: ask(command::GET_BUILD_NUMBER)?,
                target_machine: ask(command::GET_TARGET_MACHINE)?,
            })
        })
    }

    /// Whether the service has finished loading its database.
    pub fn is_database_loaded(&self) -> Result<bool> {
        self.exchange(|endpoint| {
            self.transport
                .command(endpoint, command::IS_DB_LOADED, 0, self.command_timeout)
                .map(|answer| answer != 0)
        })
    }

    /// Whether the service keeps `field` indexed (fast to sort and return).
    pub fn is_field_indexed(&self, field: ResultFields) -> Result<bool> {
        self.exchange(|endpoint| {
            self.transport
                .command(
                    endpoint,
                    command::IS_FIELD_INDEXED,
                    field.bits() as usize,
                    self.command_timeout,
                )
                .map(|answer| answer != 0)
        })
    }

    /// Hold the gate for one exchange and apply the state transitions.
    fn exchange<R>(&self, op: impl FnOnce(Endpoint) -> Result<R>) -> Result<R> {
        let mut session = self.lock_gate();
        let endpoint = self.ensure_endpoint(&mut session)?;

        self.set_state(ConnectionState::Querying);
        let result = op(endpoint);

        match &result {
            Err(e) if e.requires_reresolve() => {
                tracing::warn!("Dropping endpoint {:#x}: {}", endpoint.raw(), e);
                self.cache.invalidate(endpoint);
                session.endpoint = None;
                self.set_state(ConnectionState::Disconnected);
            }
            _ => self.set_state(ConnectionState::Ready),
        }
        result
    }

    fn ensure_endpoint(&self, session: &mut Session) -> Result<Endpoint> {
        if let Some(endpoint) = session.endpoint {
            return Ok(endpoint);
        }
        match self.cache.resolve() {
            Ok(endpoint) => {
                session.endpoint = Some(endpoint);
                self.set_state(ConnectionState::Ready);
                Ok(endpoint)
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    fn lock_gate(&self) -> MutexGuard<'_, Session> {
        match self.gate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A panic mid-exchange leaves the endpoint in an unknown state
                let mut guard = poisoned.into_inner();
                guard.endpoint = None;
                self.gate.clear_poison();
                self.set_state(ConnectionState::Disconnected);
                guard
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::codec::ReplyItem;
    use crate::ipc::mock::{MockReply, MockService};
    use crate::QixError;

    #[test]
    fn test_starts_disconnected() {
        let service = MockService::with_files(&["a.txt"]);
        let conn = Connection::new(service.clone(), service);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_then_disconnect() {
        let service = MockService::with_files(&["a.txt"]);
        let conn = Connection::new(service.clone(), service.clone());

        conn.connect().unwrap();
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert_eq!(service.locate_calls(), 1);

        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_query_leaves_ready() {
        let service = MockService::with_files(&["a.txt", "b.txt"]);
        let conn = Connection::new(service.clone(), service);

        let response = conn.query(&SearchRequest::new("*.txt").unwrap()).unwrap();
        assert_eq!(response.total_matches, 2);
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_unregistered_service_stays_disconnected() {
        let service = MockService::with_files(&[]);
        service.unregister();
        let conn = Connection::new(service.clone(), service);

        let err = conn.query(&SearchRequest::new("x").unwrap()).unwrap_err();
        assert!(matches!(err, QixError::ServiceUnavailable(_)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_timeout_keeps_endpoint() {
        let service = MockService::new(|_| {
            MockReply::Delay(
                Duration::from_millis(200),
                Box::new(MockReply::Items { total: 0, items: Vec::new() }),
            )
        });
        let conn = Connection::new(service.clone(), service.clone());
        let request = SearchRequest::builder("slow")
            .timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let err = conn.query(&request).unwrap_err();
        assert!(matches!(err, QixError::Timeout(_)));
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert_eq!(service.locate_calls(), 1);
    }

    #[test]
    fn test_corrupt_reply_keeps_endpoint() {
        let service = MockService::new(|_| MockReply::Raw(vec![0xAB; 7]));
        let conn = Connection::new(service.clone(), service);

        let err = conn.query(&SearchRequest::new("x").unwrap()).unwrap_err();
        assert!(matches!(err, QixError::CorruptReply(_)));
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_protocol_mismatch_drops_endpoint() {
        let service = MockService::new(|frame| {
            let mut reply = codec::ReplyFrame::for_request(frame, 1, vec![ReplyItem::file("C:\\", "a")]);
            reply.token = reply.token.wrapping_add(1);
            MockReply::Raw(codec::encode_reply(&reply))
        });
        let conn = Connection::new(service.clone(), service);

        let err = conn.query(&SearchRequest::new("x").unwrap()).unwrap_err();
        assert!(matches!(err, QixError::ProtocolMismatch(_)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_service_info_commands() {
        let service = MockService::with_files(&[]);
        service.set_database_loaded(true);
        service.set_indexed_fields(ResultFields::NAME | ResultFields::SIZE);
        let conn = Connection::new(service.clone(), service.clone());

        let version = conn.version().unwrap();
        assert_eq!(version.to_string(), "1.5.0.1384");
        service.set_version(ServiceVersion {
            major: 2,
            minor: 0,
            revision: 1,
            build: 7,
            target_machine: 4,
        });
        assert_eq!(conn.version().unwrap().to_string(), "2.0.1.7");
        assert!(conn.is_database_loaded().unwrap());
        assert!(conn.is_field_indexed(ResultFields::SIZE).unwrap());
        assert!(!conn.is_field_indexed(ResultFields::DATE_MODIFIED).unwrap());
    }
}
