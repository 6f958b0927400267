//! Message identifiers and emitted messages.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::offsets::TopicPartition;

/// Handle for one emitted message, returned to the host topology and handed
/// back on ack or fail.
///
/// Equality and hashing cover all four fields so identifiers from different
/// virtual consumers never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    topic: String,
    partition: i32,
    offset: i64,
    consumer_id: String,
}

impl MessageId {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        consumer_id: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            consumer_id: consumer_id.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// The JSON form used as the tuple id across the host boundary.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "topic": self.topic,
            "partition": self.partition,
            "offset": self.offset,
            "consumer_id": self.consumer_id,
        })
    }

    /// Parses a tuple id handed back by the host topology.
    ///
    /// Fails with [`Error::InvalidArgument`] when the value is not a message
    /// identifier, e.g. the host passed back a stray tuple value.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|_| Error::invalid_argument(format!("not a message identifier: {value}")))
    }
}

/// One message emitted into the host topology: the identifier plus the
/// deserialized tuple values.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub id: MessageId,
    pub values: Vec<serde_json::Value>,
}

impl StreamMessage {
    pub fn new(id: MessageId, values: Vec<serde_json::Value>) -> Self {
        Self { id, values }
    }
}

/// A raw record fetched from the broker, before deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

impl RawRecord {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}
