//! Shared types for the command pipeline crates.

mod types;

pub use types::{AggregateId, ParseAggregateIdError};
