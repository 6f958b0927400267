//! Per-partition offset tracking.
//!
//! An [`OffsetMap`] is the immutable snapshot of committed positions for one
//! virtual consumer. Its wire form is the JSON object consumed by the
//! persistence layer: keys are `"{topic}-{partition}"`, values are offsets.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single topic/partition pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    topic: String,
    partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Immutable mapping from topic/partition to offset.
///
/// Built through [`OffsetMapBuilder`]; no mutation after build.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetMap {
    offsets: BTreeMap<TopicPartition, i64>,
}

impl OffsetMap {
    pub fn builder() -> OffsetMapBuilder {
        OffsetMapBuilder::default()
    }

    /// The offset recorded for `tp`, if any.
    pub fn get(&self, tp: &TopicPartition) -> Option<i64> {
        self.offsets.get(tp).copied()
    }

    pub fn has(&self, tp: &TopicPartition) -> bool {
        self.offsets.contains_key(tp)
    }

    pub fn size(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Iterates over `(topic partition, offset)` entries.
    pub fn entries(&self) -> impl Iterator<Item = (&TopicPartition, i64)> {
        self.offsets.iter().map(|(tp, off)| (tp, *off))
    }

    pub fn partitions(&self) -> impl Iterator<Item = &TopicPartition> {
        self.offsets.keys()
    }
}

impl fmt::Display for OffsetMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (tp, off)) in self.entries().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", tp, off)?;
        }
        write!(f, "}}")
    }
}

/// Accumulating builder for [`OffsetMap`].
#[derive(Debug, Default)]
pub struct OffsetMapBuilder {
    offsets: BTreeMap<TopicPartition, i64>,
}

impl OffsetMapBuilder {
    pub fn with_partition(mut self, tp: TopicPartition, offset: i64) -> Self {
        self.offsets.insert(tp, offset);
        self
    }

    pub fn build(self) -> OffsetMap {
        OffsetMap {
            offsets: self.offsets,
        }
    }
}

impl Serialize for OffsetMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.offsets.len()))?;
        for (tp, offset) in &self.offsets {
            map.serialize_entry(&tp.to_string(), offset)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for OffsetMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OffsetMapVisitor;

        impl<'de> Visitor<'de> for OffsetMapVisitor {
            type Value = OffsetMap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of \"topic-partition\" keys to offsets")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut offsets = BTreeMap::new();
                while let Some((key, offset)) = access.next_entry::<String, i64>()? {
                    // The partition is the segment after the last dash; the
                    // topic itself may contain dashes.
                    let (topic, partition) = key
                        .rsplit_once('-')
                        .ok_or_else(|| de::Error::custom(format!("malformed key: {key}")))?;
                    let partition: i32 = partition
                        .parse()
                        .map_err(|_| de::Error::custom(format!("malformed partition in key: {key}")))?;
                    offsets.insert(TopicPartition::new(topic, partition), offset);
                }
                Ok(OffsetMap { offsets })
            }
        }

        deserializer.deserialize_map(OffsetMapVisitor)
    }
}
