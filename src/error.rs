//! Error types for attache-core

use thiserror::Error;

/// Errors that can occur in the dispatch and session layer
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transport or connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connections store failure while gathering configuration
    #[error("Connections store error: {0}")]
    Store(String),

    /// Session build failure
    #[error("Session build failed: {0}")]
    Build(String),

    /// Session build exceeded the connect timeout
    #[error("Session build timed out after {0}ms")]
    BuildTimeout(u64),

    /// Closing cached connections exceeded the close timeout
    #[error("Connection close timed out after {0}ms")]
    CloseTimeout(u64),

    /// A registered event handler failed
    #[error("Handler '{handler}' failed: {reason}")]
    Handler {
        handler: String,
        reason: String,
    },

    /// Pub/sub transport not configured or not reachable
    #[error("Pub/sub transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Reload signal publish failure
    #[error("Failed to publish reload signal for scope '{scope}': {reason}")]
    Publish {
        scope: String,
        reason: String,
    },

    /// Reload signal subscribe failure
    #[error("Failed to subscribe to scope '{scope}': {reason}")]
    Subscribe {
        scope: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Tool discovery failure
    #[error("Tool discovery error: {0}")]
    Discovery(String),

    /// Runner factory or agent runner failure
    #[error("Runner error: {0}")]
    Runner(String),

    /// A background task panicked or was aborted
    #[error("Background task failed: {0}")]
    Task(String),
}

impl CoreError {
    /// Whether this error is one of the timeout kinds
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::BuildTimeout(_) | CoreError::CloseTimeout(_))
    }
}

/// Result type alias for dispatch and session operations
pub type Result<T> = std::result::Result<T, CoreError>;
