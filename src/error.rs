//! Error types for the realtime sync core.

use crate::realtime::events::EventKind;

/// Top-level error type for the sync client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// No auth credential was available when connecting.
    #[error("no authentication token found")]
    AuthMissing,

    /// Abnormal closure or socket-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The automatic reconnect ceiling was reached.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetryExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// An inbound frame could not be parsed.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A subscriber callback returned an error or panicked.
    #[error("handler for {kind} failed: {message}")]
    HandlerFailure {
        /// Event kind being dispatched.
        kind: EventKind,
        /// Error text reported by the handler.
        message: String,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Credential store error.
    #[error("credential error: {0}")]
    Credential(String),

    /// I/O error (stringified so the error stays `Clone`).
    #[error("I/O error: {0}")]
    Io(String),

    /// The client's background loop has shut down.
    #[error("sync client is closed")]
    Closed,
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl SyncError {
    /// Whether this failure is recovered locally by the reconnect loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SyncError>;
