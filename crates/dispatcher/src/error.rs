//! Dispatcher error types.

use thiserror::Error;

/// Errors that can occur while publishing or consuming saga events.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// The receive loop is already running.
    #[error("Dispatcher is already running")]
    AlreadyRunning,

    /// The transport failed to send or receive.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The broker URL has a scheme no transport supports.
    #[error("Unsupported broker URL: {0}")]
    UnsupportedBroker(String),

    /// A required configuration variable is missing.
    #[error("Missing configuration: {0}")]
    MissingConfig(&'static str),

    /// The tracing subscriber could not be installed.
    #[error("Telemetry initialisation failed: {0}")]
    Telemetry(String),

    /// Failed to serialize or deserialize an envelope.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatcherError>;
