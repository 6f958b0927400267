//! The persistence contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spout_core::{OffsetMap, Result, SidelineRequestId, SidelineRequestType};

/// Serde helper: filter-step blobs are opaque bytes, carried as base64
/// inside the JSON value.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// The durable record kept for one sideline request.
///
/// Wire form under `{root}/requests/{requestId}`:
/// `{"type": "START"|"STOP"|"RESUME", "startingState": {...},
/// "endingState": {...}, "filterChainSteps": <base64 blob>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidelineRequestRecord {
    #[serde(rename = "type")]
    pub request_type: SidelineRequestType,
    #[serde(rename = "startingState", skip_serializing_if = "Option::is_none", default)]
    pub starting_state: Option<OffsetMap>,
    #[serde(rename = "endingState", skip_serializing_if = "Option::is_none", default)]
    pub ending_state: Option<OffsetMap>,
    /// User predicates, serialized by the filter-step codec; opaque here.
    #[serde(rename = "filterChainSteps", with = "base64_bytes")]
    pub filter_chain_steps: Vec<u8>,
}

/// Durable store for consumer offset maps and sideline request records.
///
/// Every operation fails with `Error::IllegalState` when invoked before
/// [`open`](Self::open). After a `persist_*` returns successfully, a
/// `retrieve_*` from a freshly opened manager with the same root observes
/// the written value.
#[async_trait]
pub trait PersistenceManager: Send + Sync {
    /// Validates the configuration and connects to the store.
    async fn open(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn persist_consumer_state(&self, consumer_id: &str, state: &OffsetMap) -> Result<()>;

    async fn retrieve_consumer_state(&self, consumer_id: &str) -> Result<Option<OffsetMap>>;

    async fn clear_consumer_state(&self, consumer_id: &str) -> Result<()>;

    async fn persist_sideline_request(
        &self,
        id: &SidelineRequestId,
        record: &SidelineRequestRecord,
    ) -> Result<()>;

    async fn retrieve_sideline_request(
        &self,
        id: &SidelineRequestId,
    ) -> Result<Option<SidelineRequestRecord>>;

    async fn clear_sideline_request(&self, id: &SidelineRequestId) -> Result<()>;

    /// Enumerates all persisted request ids; used on restart to resume
    /// sidelining.
    async fn list_sideline_requests(&self) -> Result<Vec<SidelineRequestId>>;
}

/// Key of a consumer state entry under the configured root.
pub(crate) fn consumer_key(root: &str, consumer_id: &str) -> String {
    format!("{root}/consumers/{consumer_id}")
}

/// Key of a sideline request entry under the configured root.
pub(crate) fn request_key(root: &str, id: &SidelineRequestId) -> String {
    format!("{root}/requests/{id}")
}
