//! Unified error types for the spout.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the spout.
#[derive(Debug, Error)]
pub enum Error {
    /// Lifecycle violation: re-open, use before open, inconsistent
    /// ending-offset configuration.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A value that is not a message identifier was handed back by the
    /// host topology.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Fault in the broker client after internal retries are exhausted.
    #[error("broker error: {0}")]
    Broker(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }
}
