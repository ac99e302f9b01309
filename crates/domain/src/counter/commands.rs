//! Counter commands.

use common::AggregateId;

use crate::command::{Command, CommandParams, ModifyCommand};

use super::Counter;

/// Command to create a counter, starting from `by`.
#[derive(Debug, Clone)]
pub struct CreateCounter {
    pub params: CommandParams,
    pub by: i64,
}

impl CreateCounter {
    pub fn new(params: CommandParams, by: i64) -> Self {
        Self { params, by }
    }
}

impl Command for CreateCounter {
    type Aggregate = Counter;

    fn command_type() -> &'static str {
        "CreateCounter"
    }

    fn params(&self) -> &CommandParams {
        &self.params
    }
}

/// Command to raise a counter.
#[derive(Debug, Clone)]
pub struct IncrementCounter {
    pub params: CommandParams,
    pub counter_id: AggregateId,
    pub by: i64,
}

impl IncrementCounter {
    pub fn new(params: CommandParams, counter_id: AggregateId, by: i64) -> Self {
        Self {
            params,
            counter_id,
            by,
        }
    }
}

impl Command for IncrementCounter {
    type Aggregate = Counter;

    fn command_type() -> &'static str {
        "IncrementCounter"
    }

    fn params(&self) -> &CommandParams {
        &self.params
    }
}

impl ModifyCommand for IncrementCounter {
    fn aggregate_id(&self) -> AggregateId {
        self.counter_id
    }
}

/// Command to lower a counter.
#[derive(Debug, Clone)]
pub struct DecrementCounter {
    pub params: CommandParams,
    pub counter_id: AggregateId,
    pub by: i64,
}

impl DecrementCounter {
    pub fn new(params: CommandParams, counter_id: AggregateId, by: i64) -> Self {
        Self {
            params,
            counter_id,
            by,
        }
    }
}

impl Command for DecrementCounter {
    type Aggregate = Counter;

    fn command_type() -> &'static str {
        "DecrementCounter"
    }

    fn params(&self) -> &CommandParams {
        &self.params
    }
}

impl ModifyCommand for DecrementCounter {
    fn aggregate_id(&self) -> AggregateId {
        self.counter_id
    }
}

/// Command to set a counter back to zero.
#[derive(Debug, Clone)]
pub struct ResetCounter {
    pub params: CommandParams,
    pub counter_id: AggregateId,
}

impl ResetCounter {
    pub fn new(params: CommandParams, counter_id: AggregateId) -> Self {
        Self { params, counter_id }
    }
}

impl Command for ResetCounter {
    type Aggregate = Counter;

    fn command_type() -> &'static str {
        "ResetCounter"
    }

    fn params(&self) -> &CommandParams {
        &self.params
    }
}

impl ModifyCommand for ResetCounter {
    fn aggregate_id(&self) -> AggregateId {
        self.counter_id
    }
}
