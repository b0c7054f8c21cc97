//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to decode event envelope: {0}")]
    Decode(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Broker connection lost: {0}")]
    BrokerConnectionLost(String),

    #[error("Operation timed out: {operation} after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::CacheUnavailable(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        Self::BrokerConnectionLost(msg.into())
    }

    /// Whether the failure is local to a single message or recipient.
    ///
    /// Recoverable errors are logged and skipped; everything else tears down
    /// the current broker subscription.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::BrokerConnectionLost(_))
    }
}
