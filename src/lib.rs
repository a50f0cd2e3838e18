//! QuickIndex (qix) - client for a running file-indexing service.
//!
//! This library talks to an external indexing process over its window-message
//! endpoint. It never builds an index itself: it locates the service, encodes
//! queries into the binary wire format, waits for the correlated reply and
//! decodes it into typed results.

pub mod config;
pub mod ipc;
pub mod logging;

use std::time::Duration;

use thiserror::Error;

/// qix error types covering all failure modes.
#[derive(Error, Debug)]
pub enum QixError {
    /// No process currently registers the endpoint identifier
    #[error("Indexing service unavailable: no endpoint registered as '{0}'. Is the service running?")]
    ServiceUnavailable(String),

    /// The endpoint resolved earlier no longer accepts messages
    #[error("Endpoint lost: {0}")]
    EndpointLost(String),

    /// No reply arrived before the deadline
    #[error("Timed out after {0:?} waiting for the indexing service")]
    Timeout(Duration),

    /// Reply carries the wrong protocol version or correlation token
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Reply failed structural validation
    #[error("Corrupt reply: {0}")]
    CorruptReply(String),

    /// Malformed request, rejected before reaching the wire
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Native message delivery failed for another reason
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// OS-level failure, such as a worker thread that cannot be spawned
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QixError {
    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QixError::ServiceUnavailable(_) | QixError::EndpointLost(_) | QixError::Timeout(_)
        )
    }

    /// Whether the cached endpoint must be dropped and looked up again.
    pub fn requires_reresolve(&self) -> bool {
        matches!(
            self,
            QixError::ServiceUnavailable(_)
                | QixError::EndpointLost(_)
                | QixError::ProtocolMismatch(_)
        )
    }
}

/// Result type alias using QixError
pub type Result<T> = std::result::Result<T, QixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(QixError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(QixError::ServiceUnavailable("X".into()).is_retryable());
        assert!(!QixError::CorruptReply("bad".into()).is_retryable());
        assert!(!QixError::InvalidArgument("bad".into()).is_retryable());
    }

    #[test]
    fn test_reresolve_classification() {
        assert!(QixError::EndpointLost("gone".into()).requires_reresolve());
        assert!(QixError::ProtocolMismatch("v9".into()).requires_reresolve());
        assert!(!QixError::Timeout(Duration::from_millis(5)).requires_reresolve());
        assert!(!QixError::CorruptReply("short".into()).requires_reresolve());
    }

    #[test]
    fn test_io_error_converts() {
        fn spawn_failure() -> Result<()> {
            let spawned: std::io::Result<()> =
                Err(std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no threads"));
            spawned?;
            Ok(())
        }
        let err = spawn_failure().unwrap_err();
        assert!(matches!(err, QixError::Io(_)));
        assert!(!err.is_retryable());
        assert!(!err.requires_reresolve());
    }
}
