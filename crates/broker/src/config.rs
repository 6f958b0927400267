//! Kafka consumer configuration.

use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize brokers as either a comma-separated string or a list.
fn deserialize_brokers<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Brokers {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match Brokers::deserialize(deserializer)? {
        Brokers::List(list) => list,
        Brokers::Csv(csv) => csv.split(',').map(|s| s.trim().to_string()).collect(),
    })
}

/// Where a consumer starts when no persisted offset exists for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartingPosition {
    #[default]
    Earliest,
    Latest,
}

/// Kafka consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Broker addresses (comma-separated string or list); required to open
    /// a consumer.
    #[serde(deserialize_with = "deserialize_brokers", default = "default_brokers")]
    pub brokers: Vec<String>,
    /// Topic to consume from
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Partitions assigned to the firehose consumer
    #[serde(default = "default_partitions")]
    pub partitions: Vec<i32>,
    /// SASL username (for cloud authentication)
    pub sasl_username: Option<String>,
    /// SASL password (for cloud authentication)
    pub sasl_password: Option<String>,
    /// Starting position when no offset is known for a partition
    #[serde(default)]
    pub starting_position: StartingPosition,
    /// Upper bound per fetch request, in bytes
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: i32,
    /// How long one fetch may wait for data, in milliseconds
    #[serde(default = "default_fetch_max_wait_ms")]
    pub fetch_max_wait_ms: i32,
    /// Internal retries for transient fetch failures
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    /// Backoff between fetch retries, in milliseconds
    #[serde(default = "default_fetch_retry_backoff_ms")]
    pub fetch_retry_backoff_ms: u64,
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_topic() -> String {
    "events".to_string()
}

fn default_partitions() -> Vec<i32> {
    vec![0]
}

fn default_fetch_max_bytes() -> i32 {
    1024 * 1024
}

fn default_fetch_max_wait_ms() -> i32 {
    250
}

fn default_fetch_retries() -> u32 {
    3
}

fn default_fetch_retry_backoff_ms() -> u64 {
    100
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic: default_topic(),
            partitions: default_partitions(),
            sasl_username: None,
            sasl_password: None,
            starting_position: StartingPosition::default(),
            fetch_max_bytes: default_fetch_max_bytes(),
            fetch_max_wait_ms: default_fetch_max_wait_ms(),
            fetch_retries: default_fetch_retries(),
            fetch_retry_backoff_ms: default_fetch_retry_backoff_ms(),
        }
    }
}

impl KafkaConfig {
    /// Returns the broker list as a comma-separated string.
    pub fn broker_string(&self) -> String {
        self.brokers.join(",")
    }
}
