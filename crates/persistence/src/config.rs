//! Persistence configuration.

use serde::{Deserialize, Serialize};
use spout_core::{Error, Result};

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Durable-store endpoints (host:port)
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    /// Path prefix under which all state is stored; required
    #[serde(default)]
    pub root: Option<String>,
}

fn default_servers() -> Vec<String> {
    vec!["localhost:6379".to_string()]
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            root: None,
        }
    }
}

impl PersistenceConfig {
    /// The configured root prefix; absence is a configuration error.
    pub fn require_root(&self) -> Result<&str> {
        self.root
            .as_deref()
            .filter(|root| !root.is_empty())
            .ok_or_else(|| Error::illegal_state("persistence root is not configured"))
    }
}
