//! Broker consumer contract and the Kafka-backed implementation.

pub mod config;
pub mod consumer;
pub mod kafka;

pub use config::*;
pub use consumer::*;
pub use kafka::*;
