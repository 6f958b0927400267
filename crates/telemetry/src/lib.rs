//! Internal telemetry for the sideline spout.
//!
//! Metrics are collected in-memory; the coordinator monitor logs a snapshot
//! on each sweep.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::*;
pub use tracing_setup::*;
