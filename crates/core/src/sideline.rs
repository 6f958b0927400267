//! Sideline request identifiers and trigger types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one sideline request. Filter steps in a chain and persisted
/// request records are keyed by this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SidelineRequestId(String);

impl SidelineRequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id for a new request.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SidelineRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trigger type of a sideline request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SidelineRequestType {
    Start,
    Resume,
    Stop,
}
