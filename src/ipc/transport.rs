//! Message transport to the indexing service.
//!
//! On Windows a request is copied into the service process with a blocking
//! `SendMessageW(WM_COPYDATA)`; the service answers with its own `WM_COPYDATA`
//! to a hidden reply window owned by this process. The send primitive has no
//! timeout, so it runs on a worker thread raced against the caller's deadline.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ipc::codec::{peek_reply_token, peek_request_token};
use crate::ipc::locator::Endpoint;
use crate::{QixError, Result};

/// Delivers encoded requests and returns the raw reply.
pub trait Transport: Send + Sync {
    /// Deliver `request` to `endpoint` and block until the correlated reply
    /// arrives or `timeout` elapses.
    ///
    /// # Errors
    /// `Timeout`, `EndpointLost` when the target no longer exists, or
    /// `Transport` for other delivery failures.
    fn send(&self, endpoint: Endpoint, request: &[u8], timeout: Duration) -> Result<Vec<u8>>;

    /// Send a scalar command and return the service's 32-bit answer.
    fn command(&self, endpoint: Endpoint, command: u32, param: usize, timeout: Duration)
        -> Result<u32>;
}

/// Run blocking `work` on its own thread and wait at most `timeout` for it.
///
/// On timeout the worker is abandoned: it keeps running until the blocking
/// call returns, and its result is dropped.
pub fn run_with_deadline<T, F>(timeout: Duration, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("qix-send".to_string())
        .spawn(move || {
            // Receiver is gone if the caller already timed out
            let _ = tx.send(work());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            tracing::warn!("No answer within {:?}, abandoning blocked send", timeout);
            Err(QixError::Timeout(timeout))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(QixError::Transport("Send worker exited without a result".to_string()))
        }
    }
}

/// Incoming reply payloads, matched to requests by correlation token.
///
/// Replies that answer an earlier, timed-out exchange can still arrive. They
/// are drained before the next request goes out and skipped while waiting.
pub struct ReplyQueue {
    replies: Mutex<Receiver<Vec<u8>>>,
}

impl ReplyQueue {
    /// Queue plus the sender the reply window pushes payloads into.
    pub fn channel() -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel();
        (
            tx,
            Self {
                replies: Mutex::new(rx),
            },
        )
    }

    /// Run `deliver` for `request`, then wait until `timeout` for the reply
    /// carrying the request's token.
    ///
    /// The queue stays locked for the whole exchange.
    pub fn exchange<F>(&self, request: &[u8], timeout: Duration, deliver: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<()>,
    {
        let token = peek_request_token(request)
            .ok_or_else(|| QixError::Transport("Request has no header".to_string()))?;
        let deadline = Instant::now() + timeout;

        let replies = self
            .replies
            .lock()
            .map_err(|_| QixError::Transport("Reply queue lock poisoned".to_string()))?;

        while let Ok(stale) = replies.try_recv() {
            tracing::debug!("Draining stale reply ({} bytes)", stale.len());
        }

        deliver()?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match replies.recv_timeout(remaining) {
                Ok(reply) if peek_reply_token(&reply) == Some(token) => return Ok(reply),
                Ok(other) => {
                    tracing::warn!(
                        "Discarding reply for another request ({} bytes)",
                        other.len()
                    );
                }
                Err(mpsc::RecvTimeoutError::Timeout) => return Err(QixError::Timeout(timeout)),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(QixError::Transport("Reply window closed".to_string()));
                }
            }
        }
    }
}

/// Encode a string as a NUL-terminated wide string.
#[cfg(windows)]
pub(crate) fn to_wide(s: &str) -> Vec<u16> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;

    OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

#[cfg(windows)]
pub use windows_impl::WindowTransport;

#[cfg(windows)]
mod windows_impl {
    use std::collections::HashMap;
    use std::sync::mpsc::{self, Sender};
    use std::sync::{Mutex, OnceLock};
    use std::thread::JoinHandle;
    use std::time::Duration;

    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
    use windows::Win32::System::DataExchange::COPYDATASTRUCT;
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::UI::WindowsAndMessaging::{
        CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW, IsWindow,
        PostMessageW, PostQuitMessage, RegisterClassW, SendMessageW, TranslateMessage,
        HWND_MESSAGE, MSG, WINDOW_EX_STYLE, WINDOW_STYLE, WM_CLOSE, WM_COPYDATA, WM_DESTROY,
        WM_USER, WNDCLASSW,
    };

    use super::{run_with_deadline, to_wide, ReplyQueue, Transport};
    use crate::ipc::locator::Endpoint;
    use crate::ipc::protocol::{COPYDATA_QUERY, COPYDATA_REPLY, MAX_REPLY_SIZE};
    use crate::{QixError, Result};

    const REPLY_WINDOW_CLASS: &str = "QIX_CLIENT_REPLY";

    /// Reply windows and where their incoming payloads go.
    static REPLY_ROUTES: OnceLock<Mutex<HashMap<isize, Sender<Vec<u8>>>>> = OnceLock::new();

    fn routes() -> &'static Mutex<HashMap<isize, Sender<Vec<u8>>>> {
        REPLY_ROUTES.get_or_init(|| Mutex::new(HashMap::new()))
    }

    unsafe extern "system" fn wnd_proc(
        hwnd: HWND,
        msg: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> LRESULT {
        match msg {
            WM_COPYDATA => {
                if lparam.0 == 0 {
                    return LRESULT(0);
                }
                let copydata = &*(lparam.0 as *const COPYDATASTRUCT);
                if copydata.dwData != COPYDATA_REPLY {
                    tracing::debug!("Ignoring WM_COPYDATA with tag {:#x}", copydata.dwData);
                    return LRESULT(0);
                }
                let len = copydata.cbData as usize;
                if len > MAX_REPLY_SIZE || (len > 0 && copydata.lpData.is_null()) {
                    tracing::warn!("Dropping unusable reply of {} bytes", len);
                    return LRESULT(0);
                }
                // The service's buffer is only valid for the duration of this call
                let payload = if len == 0 {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts(copydata.lpData as *const u8, len).to_vec()
                };

                let routes = routes().lock().unwrap_or_else(|e| e.into_inner());
                match routes.get(&(hwnd.0 as isize)) {
                    Some(tx) => {
                        let _ = tx.send(payload);
                        LRESULT(1)
                    }
                    None => LRESULT(0),
                }
            }
            WM_DESTROY => {
                PostQuitMessage(0);
                LRESULT(0)
            }
            _ => DefWindowProcW(hwnd, msg, wparam, lparam),
        }
    }

    /// Create the hidden reply window and pump its messages until closed.
    fn reply_window_loop(ready: Sender<Result<isize>>, replies: Sender<Vec<u8>>) {
        let class_name = to_wide(REPLY_WINDOW_CLASS);
        let instance = unsafe { GetModuleHandleW(None).unwrap_or_default() };

        let wc = WNDCLASSW {
            lpfnWndProc: Some(wnd_proc),
            hInstance: instance.into(),
            lpszClassName: PCWSTR::from_raw(class_name.as_ptr()),
            ..Default::default()
        };
        // Fails harmlessly when another transport already registered the class
        let _ = unsafe { RegisterClassW(&wc) };

        let hwnd = unsafe {
            CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                PCWSTR::from_raw(class_name.as_ptr()),
                PCWSTR::null(),
                WINDOW_STYLE::default(),
                0, 0, 0, 0,
                Some(HWND_MESSAGE),
                None,
                Some(wc.hInstance),
                None,
            )
        };
        let hwnd = match hwnd {
            Ok(h) if !h.is_invalid() => h,
            Ok(_) => {
                let _ = ready.send(Err(QixError::Transport(
                    "Reply window handle is invalid".to_string(),
                )));
                return;
            }
            Err(e) => {
                let _ = ready.send(Err(QixError::Transport(format!(
                    "Failed to create reply window: {}",
                    e
                ))));
                return;
            }
        };

        let key = hwnd.0 as isize;
        routes()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, replies);
        let _ = ready.send(Ok(key));
        tracing::debug!("Reply window {:#x} ready", key);

        let mut msg = MSG::default();
        loop {
            let result = unsafe { GetMessageW(&mut msg, None, 0, 0) };
            // 0 = WM_QUIT, -1 = error
            if result.0 <= 0 {
                break;
            }
            unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }

        routes().lock().unwrap_or_else(|e| e.into_inner()).remove(&key);
        unsafe {
            let _ = DestroyWindow(hwnd);
        }
        tracing::debug!("Reply window {:#x} closed", key);
    }

    fn window_exists(raw: isize) -> bool {
        unsafe { IsWindow(Some(HWND(raw as *mut _))).as_bool() }
    }

    /// Window-message transport with its own reply window.
    pub struct WindowTransport {
        reply_hwnd: isize,
        replies: ReplyQueue,
        thread: Option<JoinHandle<()>>,
    }

    impl WindowTransport {
        /// Start the reply window thread.
        ///
        /// # Errors
        /// Returns `Transport` if the window cannot be created, or `Io` if
        /// its thread cannot be spawned.
        pub fn new() -> Result<Self> {
            let (ready_tx, ready_rx) = mpsc::channel();
            let (reply_tx, replies) = ReplyQueue::channel();

            let thread = std::thread::Builder::new()
                .name("qix-reply-window".to_string())
                .spawn(move || reply_window_loop(ready_tx, reply_tx))?;

            let reply_hwnd = ready_rx
                .recv()
                .map_err(|_| QixError::Transport("Reply thread exited during startup".to_string()))??;

            Ok(Self {
                reply_hwnd,
                replies,
                thread: Some(thread),
            })
        }
    }

    impl Transport for WindowTransport {
        fn send(&self, endpoint: Endpoint, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
            let target = endpoint.raw();
            let reply_hwnd = self.reply_hwnd;
            let payload = request.to_vec();
            self.replies.exchange(request, timeout, move || {
                run_with_deadline(timeout, move || {
                    if !window_exists(target) {
                        return Err(QixError::EndpointLost(format!(
                            "Service window {:#x} no longer exists",
                            target
                        )));
                    }
                    let copydata = COPYDATASTRUCT {
                        dwData: COPYDATA_QUERY,
                        cbData: payload.len() as u32,
                        lpData: payload.as_ptr() as *mut _,
                    };
                    let accepted = unsafe {
                        SendMessageW(
                            HWND(target as *mut _),
                            WM_COPYDATA,
                            Some(WPARAM(reply_hwnd as usize)),
                            Some(LPARAM(&copydata as *const COPYDATASTRUCT as isize)),
                        )
                    };
                    if accepted.0 != 0 {
                        Ok(())
                    } else if !window_exists(target) {
                        Err(QixError::EndpointLost(format!(
                            "Service window {:#x} closed during delivery",
                            target
                        )))
                    } else {
                        Err(QixError::Transport("Service refused the request".to_string()))
                    }
                })
            })
        }

        fn command(
            &self,
            endpoint: Endpoint,
            command: u32,
            param: usize,
            timeout: Duration,
        ) -> Result<u32> {
            let target = endpoint.raw();
            run_with_deadline(timeout, move || {
                if !window_exists(target) {
                    return Err(QixError::EndpointLost(format!(
                        "Service window {:#x} no longer exists",
                        target
                    )));
                }
                let answer = unsafe {
                    SendMessageW(
                        HWND(target as *mut _),
                        WM_USER,
                        Some(WPARAM(command as usize)),
                        Some(LPARAM(param as isize)),
                    )
                };
                if answer.0 == 0 && !window_exists(target) {
                    return Err(QixError::EndpointLost(format!(
                        "Service window {:#x} closed during command {}",
                        target, command
                    )));
                }
                Ok(answer.0 as u32)
            })
        }
    }

    impl Drop for WindowTransport {
        fn drop(&mut self) {
            unsafe {
                let _ = PostMessageW(
                    Some(HWND(self.reply_hwnd as *mut _)),
                    WM_CLOSE,
                    WPARAM(0),
                    LPARAM(0),
                );
            }
            if let Some(handle) = self.thread.take() {
                if handle.join().is_err() {
                    tracing::error!("Reply window thread panicked");
                }
            }
        }
    }
}

/// Stub for non-Windows platforms.
#[cfg(not(windows))]
pub struct WindowTransport {
    _private: (),
}

#[cfg(not(windows))]
impl WindowTransport {
    /// Window messaging does not exist here; always fails.
    pub fn new() -> Result<Self> {
        Err(QixError::Transport(
            "Window-message transport is only available on Windows".to_string(),
        ))
    }
}

#[cfg(not(windows))]
impl Transport for WindowTransport {
    fn send(&self, _endpoint: Endpoint, _request: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        Err(QixError::Transport(
            "Window-message transport is only available on Windows".to_string(),
        ))
    }

    fn command(
        &self,
        _endpoint: Endpoint,
        _command: u32,
        _param: usize,
        _timeout: Duration,
    ) -> Result<u32> {
        Err(QixError::Transport(
            "Window-message transport is only available on Windows".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::codec::{decode_request, encode_reply, encode_request, ReplyFrame};
    use crate::ipc::protocol::SearchRequest;

    #[test]
    fn test_deadline_returns_result() {
        let value = run_with_deadline(Duration::from_secs(1), || Ok(42)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_deadline_propagates_error() {
        let err = run_with_deadline::<(), _>(Duration::from_secs(1), || {
            Err(QixError::EndpointLost("gone".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, QixError::EndpointLost(_)));
    }

    #[test]
    fn test_deadline_times_out_blocked_call() {
        let start = Instant::now();
        let err = run_with_deadline(Duration::from_millis(50), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();

        assert!(matches!(err, QixError::Timeout(d) if d == Duration::from_millis(50)));
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_panicking_worker_is_transport_error() {
        let err = run_with_deadline::<(), _>(Duration::from_secs(1), || panic!("boom")).unwrap_err();
        assert!(matches!(err, QixError::Transport(_)));
    }

    fn request_with_token(token: u64) -> Vec<u8> {
        let request = SearchRequest::builder("x")
            .correlation_token(token)
            .build()
            .unwrap();
        encode_request(&request)
    }

    fn reply_with_token(token: u64) -> Vec<u8> {
        let frame = decode_request(&request_with_token(token)).unwrap();
        encode_reply(&ReplyFrame::for_request(&frame, 0, Vec::new()))
    }

    #[test]
    fn test_queued_stale_reply_is_drained() {
        let (tx, queue) = ReplyQueue::channel();
        tx.send(reply_with_token(1)).unwrap();

        let answer = tx.clone();
        let reply = queue
            .exchange(&request_with_token(2), Duration::from_secs(1), move || {
                answer.send(reply_with_token(2)).unwrap();
                Ok(())
            })
            .unwrap();
        assert_eq!(peek_reply_token(&reply), Some(2));
    }

    #[test]
    fn test_foreign_reply_during_wait_is_skipped() {
        let (tx, queue) = ReplyQueue::channel();

        let reply = queue
            .exchange(&request_with_token(7), Duration::from_secs(1), move || {
                tx.send(reply_with_token(6)).unwrap();
                tx.send(b"junk".to_vec()).unwrap();
                tx.send(reply_with_token(7)).unwrap();
                Ok(())
            })
            .unwrap();
        assert_eq!(peek_reply_token(&reply), Some(7));
    }

    #[test]
    fn test_late_reply_after_timeout_is_not_read_as_next_answer() {
        let (tx, queue) = ReplyQueue::channel();

        // Service answers the first request only after its deadline
        let late = tx.clone();
        let err = queue
            .exchange(&request_with_token(10), Duration::from_millis(30), move || {
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(80));
                    let _ = late.send(reply_with_token(10));
                });
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, QixError::Timeout(_)));

        std::thread::sleep(Duration::from_millis(120));
        let answer = tx.clone();
        let reply = queue
            .exchange(&request_with_token(11), Duration::from_secs(1), move || {
                answer.send(reply_with_token(11)).unwrap();
                Ok(())
            })
            .unwrap();
        assert_eq!(peek_reply_token(&reply), Some(11));
    }

    #[test]
    fn test_only_foreign_replies_times_out() {
        let (tx, queue) = ReplyQueue::channel();

        let err = queue
            .exchange(&request_with_token(20), Duration::from_millis(40), move || {
                tx.send(reply_with_token(21)).unwrap();
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, QixError::Timeout(d) if d == Duration::from_millis(40)));
    }

    #[test]
    fn test_delivery_failure_skips_wait() {
        let (_tx, queue) = ReplyQueue::channel();
        let start = Instant::now();

        let err = queue
            .exchange(&request_with_token(30), Duration::from_secs(2), || {
                Err(QixError::EndpointLost("gone".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, QixError::EndpointLost(_)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_request_without_header_is_rejected() {
        let (_tx, queue) = ReplyQueue::channel();
        let err = queue
            .exchange(&[1, 2, 3], Duration::from_millis(10), || Ok(()))
            .unwrap_err();
        assert!(matches!(err, QixError::Transport(_)));
    }
}
