//! Error types for shellbridge.

use thiserror::Error;

use crate::SessionState;

/// Main error type for shellbridge operations.
///
/// A command that exceeds its timeout is not an error: it is reported through
/// [`CommandStatus::TimedOut`](crate::CommandStatus::TimedOut) on the
/// execution record.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable shell or multiplexer executable could be located
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Process or pane creation failed
    #[error("Spawn failure: {0}")]
    SpawnFailure(String),

    /// Operation called before `initialize()`
    #[error("Session is not initialized")]
    NotInitialized,

    /// Operation called after `close()`
    #[error("Session is closed")]
    SessionClosed,

    /// Operation not valid in the current session state
    #[error("Invalid state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the operation requires
        expected: SessionState,
        /// State the session was in
        actual: SessionState,
    },

    /// A previous command is still in flight
    #[error("Command still running: {0}")]
    CommandStillRunning(String),

    /// The shell process exited; the session cannot run further commands
    #[error("Shell process exited (code: {0:?})")]
    ProcessExited(Option<i32>),

    /// Backend-level I/O or control failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
