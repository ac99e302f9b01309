//! Counter domain events.

use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// The counter went up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incremented {
    pub by: i64,
}

impl DomainEvent for Incremented {
    fn event_type() -> &'static str {
        "Incremented"
    }
}

/// The counter went down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decremented {
    pub by: i64,
}

impl DomainEvent for Decremented {
    fn event_type() -> &'static str {
        "Decremented"
    }
}

/// The counter was set back to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterReset {
    pub previous: i64,
}

impl DomainEvent for CounterReset {
    fn event_type() -> &'static str {
        "CounterReset"
    }
}
