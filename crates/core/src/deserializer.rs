//! Pluggable deserialization of record payloads into tuple values.

use serde_json::Value;

use crate::message::RawRecord;

/// Turns a raw record into tuple values.
///
/// Returning `None` marks the record as undeserializable; the spout drops it
/// without acking.
pub trait Deserializer: Send + Sync {
    fn deserialize(&self, record: &RawRecord) -> Option<Vec<Value>>;
}

/// Emits the record key and value as UTF-8 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Deserializer;

impl Deserializer for Utf8Deserializer {
    fn deserialize(&self, record: &RawRecord) -> Option<Vec<Value>> {
        let key = record
            .key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();
        let value = String::from_utf8_lossy(&record.value).into_owned();
        Some(vec![Value::String(key), Value::String(value)])
    }
}

/// Parses the record value as a single JSON document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeserializer;

impl Deserializer for JsonDeserializer {
    fn deserialize(&self, record: &RawRecord) -> Option<Vec<Value>> {
        serde_json::from_slice(&record.value).ok().map(|v| vec![v])
    }
}
