//! Command handlers for the counter.

use async_trait::async_trait;

use crate::command::{CommandHandler, CommandHandlers};
use crate::error::DomainError;

use super::{Counter, CreateCounter, DecrementCounter, IncrementCounter, ResetCounter};

/// Handles every counter command.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterCommandHandler;

impl CounterCommandHandler {
    /// Registers this handler for every counter command.
    pub fn register(handlers: &mut CommandHandlers) {
        handlers
            .register::<CreateCounter, _>(Self)
            .register::<IncrementCounter, _>(Self)
            .register::<DecrementCounter, _>(Self)
            .register::<ResetCounter, _>(Self);
    }
}

#[async_trait]
impl CommandHandler<CreateCounter> for CounterCommandHandler {
    async fn handle(
        &self,
        counter: &mut Counter,
        command: &CreateCounter,
    ) -> Result<(), DomainError> {
        counter.increment(command.by)
    }
}

#[async_trait]
impl CommandHandler<IncrementCounter> for CounterCommandHandler {
    async fn handle(
        &self,
        counter: &mut Counter,
        command: &IncrementCounter,
    ) -> Result<(), DomainError> {
        counter.increment(command.by)
    }
}

#[async_trait]
impl CommandHandler<DecrementCounter> for CounterCommandHandler {
    async fn handle(
        &self,
        counter: &mut Counter,
        command: &DecrementCounter,
    ) -> Result<(), DomainError> {
        counter.decrement(command.by)
    }
}

#[async_trait]
impl CommandHandler<ResetCounter> for CounterCommandHandler {
    async fn handle(
        &self,
        counter: &mut Counter,
        _command: &ResetCounter,
    ) -> Result<(), DomainError> {
        counter.reset()
    }
}
