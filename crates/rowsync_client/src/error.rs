//! Error types for the sync client.

use rowsync_protocol::{CodecError, SchemaError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a synchronization run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network, HTTP status or server failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server broke the protocol contract.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A schema or payload failed structural validation.
    #[error("schema violation: {0}")]
    Schema(#[from] SchemaError),

    /// The server no longer knows the session; the run must restart.
    #[error("session {session_id} lost on the server")]
    SessionLost {
        /// The session id the client was pinned to.
        session_id: String,
    },

    /// Envelope serialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The retry budget ran out.
    #[error("request failed after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error of the last attempt.
        #[source]
        source: Box<SyncError>,
    },

    /// The operation is not available on this orchestrator.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// The run was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A batch part store failed.
    #[error("batch storage error: {0}")]
    Storage(String),

    /// I/O error from a batch part store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Fatal contract violation.
    ProtocolViolation,
    /// Session lost; restart the run.
    SessionLost,
    /// Transport or server failure.
    Transient,
    /// Unsupported operation.
    Unsupported,
    /// Cancelled by the caller.
    Cancelled,
    /// Local batch storage failure.
    Storage,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a protocol violation.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns the coarse kind, looking through exhausted retries.
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::Protocol(_) | SyncError::Schema(_) => SyncErrorKind::ProtocolViolation,
            SyncError::SessionLost { .. } => SyncErrorKind::SessionLost,
            SyncError::Transport { .. } | SyncError::Codec(_) => SyncErrorKind::Transient,
            SyncError::RetryExhausted { source, .. } => source.kind(),
            SyncError::Unsupported(_) => SyncErrorKind::Unsupported,
            SyncError::Cancelled => SyncErrorKind::Cancelled,
            SyncError::Storage(_) | SyncError::Io(_) => SyncErrorKind::Storage,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Codec(_) => true,
            _ => false,
        }
    }

    /// Returns true if the server reported the session as lost.
    pub fn is_session_lost(&self) -> bool {
        self.kind() == SyncErrorKind::SessionLost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Codec(CodecError::decoding_failed("eof")).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::SessionLost {
            session_id: "s".into()
        }
        .is_retryable());
    }

    #[test]
    fn kinds() {
        assert_eq!(
            SyncError::protocol("null response").kind(),
            SyncErrorKind::ProtocolViolation
        );
        assert_eq!(
            SyncError::Schema(SchemaError::Empty).kind(),
            SyncErrorKind::ProtocolViolation
        );
        assert_eq!(
            SyncError::Unsupported("upgrade").kind(),
            SyncErrorKind::Unsupported
        );

        let exhausted = SyncError::RetryExhausted {
            attempts: 10,
            source: Box::new(SyncError::transport_retryable("timeout")),
        };
        assert_eq!(exhausted.kind(), SyncErrorKind::Transient);
        assert!(!exhausted.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::SessionLost {
            session_id: "abc".into(),
        };
        assert_eq!(err.to_string(), "session abc lost on the server");

        let err = SyncError::RetryExhausted {
            attempts: 3,
            source: Box::new(SyncError::transport_retryable("503")),
        };
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("503"));
    }
}
