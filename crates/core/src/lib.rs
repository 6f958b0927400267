//! Core types and contracts for the sideline spout.

pub mod deserializer;
pub mod error;
pub mod filter;
pub mod message;
pub mod offsets;
pub mod sideline;

pub use deserializer::*;
pub use error::{Error, Result};
pub use filter::*;
pub use message::*;
pub use offsets::*;
pub use sideline::*;
