//! Counter aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod handlers;

pub use aggregate::Counter;
pub use commands::{CreateCounter, DecrementCounter, IncrementCounter, ResetCounter};
pub use events::{CounterReset, Decremented, Incremented};
pub use handlers::CounterCommandHandler;

use thiserror::Error;

use crate::error::DomainError;

/// Errors that can occur during counter operations.
#[derive(Debug, Error)]
pub enum CounterError {
    /// Amounts must be positive.
    #[error("Invalid amount: {by} (must be greater than 0)")]
    InvalidAmount { by: i64 },

    #[error("Cannot decrement {value} by {by}")]
    WouldGoNegative { value: i64, by: i64 },

    #[error("Cannot increment {value} by {by} without overflowing")]
    Overflow { value: i64, by: i64 },
}

impl From<CounterError> for DomainError {
    fn from(e: CounterError) -> Self {
        DomainError::rejected(e)
    }
}
