//! Counter aggregate implementation.

use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, AggregateRoot, ApplyTable};
use crate::error::DomainError;

use super::{CounterError, CounterReset, Decremented, Incremented};

/// A non-negative counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counter {
    #[serde(skip)]
    root: AggregateRoot,
    value: i64,
}

impl Counter {
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Raises the counter by a positive amount.
    pub fn increment(&mut self, by: i64) -> Result<(), DomainError> {
        if by <= 0 {
            return Err(CounterError::InvalidAmount { by }.into());
        }
        if self.value.checked_add(by).is_none() {
            return Err(CounterError::Overflow {
                value: self.value,
                by,
            }
            .into());
        }
        self.emit(Incremented { by })
    }

    /// Lowers the counter by a positive amount, never below zero.
    pub fn decrement(&mut self, by: i64) -> Result<(), DomainError> {
        if by <= 0 {
            return Err(CounterError::InvalidAmount { by }.into());
        }
        if by > self.value {
            return Err(CounterError::WouldGoNegative {
                value: self.value,
                by,
            }
            .into());
        }
        self.emit(Decremented { by })
    }

    /// Sets the counter back to zero. Does nothing if it already is.
    pub fn reset(&mut self) -> Result<(), DomainError> {
        if self.value == 0 {
            return Ok(());
        }
        self.emit(CounterReset {
            previous: self.value,
        })
    }

    fn apply_incremented(&mut self, event: &Incremented) {
        self.value += event.by;
    }

    fn apply_decremented(&mut self, event: &Decremented) {
        self.value -= event.by;
    }

    fn apply_reset(&mut self, _event: &CounterReset) {
        self.value = 0;
    }
}

impl Aggregate for Counter {
    fn aggregate_type() -> &'static str {
        "Counter"
    }

    fn register(table: &mut ApplyTable<Self>) {
        table
            .on::<Incremented>(Self::apply_incremented)
            .on::<Decremented>(Self::apply_decremented)
            .on::<CounterReset>(Self::apply_reset);
    }

    fn root(&self) -> &AggregateRoot {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot {
        &mut self.root
    }
}
