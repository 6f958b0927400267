//! Spout and coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Spout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoutConfig {
    /// Namespace for virtual consumer ids
    #[serde(default = "default_consumer_id_prefix")]
    pub consumer_id_prefix: String,
    /// How often the monitor sweeps the pending queue, in milliseconds
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    /// How often each spout flushes its offsets, in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// How long close() waits for spouts to drain, in milliseconds
    #[serde(default = "default_max_stop_wait_ms")]
    pub max_stop_wait_ms: u64,
    /// Capacity of the output queue shared by all spouts
    #[serde(default = "default_output_queue_size")]
    pub output_queue_size: usize,
    /// Pause when a spout has nothing to emit, in milliseconds
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    /// How long next_tuple() waits for a message, in milliseconds
    #[serde(default = "default_tuple_wait_ms")]
    pub tuple_wait_ms: u64,
}

fn default_consumer_id_prefix() -> String {
    "spout".to_string()
}

fn default_monitor_interval_ms() -> u64 {
    2000
}

fn default_flush_interval_ms() -> u64 {
    30000
}

fn default_max_stop_wait_ms() -> u64 {
    10000
}

fn default_output_queue_size() -> usize {
    1024
}

fn default_idle_wait_ms() -> u64 {
    10
}

fn default_tuple_wait_ms() -> u64 {
    100
}

impl Default for SpoutConfig {
    fn default() -> Self {
        Self {
            consumer_id_prefix: default_consumer_id_prefix(),
            monitor_interval_ms: default_monitor_interval_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            max_stop_wait_ms: default_max_stop_wait_ms(),
            output_queue_size: default_output_queue_size(),
            idle_wait_ms: default_idle_wait_ms(),
            tuple_wait_ms: default_tuple_wait_ms(),
        }
    }
}

impl SpoutConfig {
    pub fn firehose_consumer_id(&self) -> String {
        format!("{}-firehose", self.consumer_id_prefix)
    }

    pub fn sideline_consumer_id(&self, request_id: impl std::fmt::Display) -> String {
        format!("{}-sideline-{}", self.consumer_id_prefix, request_id)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn max_stop_wait(&self) -> Duration {
        Duration::from_millis(self.max_stop_wait_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn tuple_wait(&self) -> Duration {
        Duration::from_millis(self.tuple_wait_ms)
    }
}
