//! The contract the spout core depends on.

use async_trait::async_trait;
use spout_core::{OffsetMap, RawRecord, Result, TopicPartition};

/// Thin contract over the underlying commit-log client.
///
/// Exactly one virtual spout owns a given consumer; transient broker faults
/// are retried internally and only surface as `Error::Broker` once retries
/// are exhausted. `None` from [`next_record`](Self::next_record) is not an
/// error.
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Establishes the connection and resolves starting positions. The
    /// owning spout calls this exactly once.
    async fn connect(&mut self) -> Result<()>;

    /// Returns the next available record for the subscribed partitions, or
    /// `None` when nothing is currently buffered.
    async fn next_record(&mut self) -> Result<Option<RawRecord>>;

    /// Marks `offset` as the next unconsumed position for `tp` in the
    /// consumer's committed state.
    async fn commit_offset(&mut self, tp: &TopicPartition, offset: i64) -> Result<()>;

    /// Rewinds the fetch position of `tp` so a failed record is delivered
    /// again on a later poll.
    async fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<()>;

    /// Removes `tp` from the active assignment. Returns whether anything
    /// changed.
    async fn unsubscribe_topic_partition(&mut self, tp: &TopicPartition) -> Result<bool>;

    /// Snapshot of committed positions across the partitions still
    /// assigned.
    fn current_state(&self) -> OffsetMap;

    /// Releases resources.
    async fn close(&mut self) -> Result<()>;
}

/// Mints broker consumers for dynamically created spouts.
///
/// The sideline handler uses this seam to give each bounded spout its own
/// single-owner consumer instance.
#[async_trait]
pub trait BrokerConsumerFactory: Send + Sync {
    async fn create(
        &self,
        consumer_id: &str,
        starting_offsets: Option<OffsetMap>,
    ) -> Result<Box<dyn BrokerConsumer>>;
}
