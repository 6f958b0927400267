//! Virtual spouts, the coordinator that supervises them, and sideline
//! handling.
//!
//! Data flow: broker consumer → virtual spout (deserialize → filter →
//! bound-check → track) → coordinator output queue → host topology.
//! Control flow: host ack/fail → coordinator mailboxes → originating
//! virtual spout → broker offset commit.

pub mod config;
pub mod coordinator;
pub mod sideline;
pub mod topology;
pub mod virtual_spout;

pub use config::*;
pub use coordinator::*;
pub use sideline::*;
pub use topology::*;
pub use virtual_spout::*;
