//! Domain layer for the event-sourcing system.
//!
//! This crate provides the core domain abstractions including:
//! - Aggregate trait with per-type apply tables and buffered events
//! - Commands, command handlers and the handler registry
//! - CommandBus and Committer implementing the commit protocol
//! - The publisher seam and redelivery of unpublished records
//! - Counter aggregate used by the server and the tests

pub mod aggregate;
pub mod bus;
pub mod command;
pub mod committer;
pub mod context;
pub mod counter;
pub mod error;
pub mod publish;
pub mod redelivery;

pub use aggregate::{Aggregate, AggregateEvent, AggregateRoot, ApplyTable, DomainEvent};
pub use bus::{CommandBus, CommandResult, TrackedAggregate};
pub use command::{Command, CommandHandler, CommandHandlers, CommandParams, ModifyCommand};
pub use committer::{Committer, PendingWrite};
pub use context::{CommandContext, PublishContext};
pub use counter::{
    Counter, CounterCommandHandler, CounterError, CounterReset, CreateCounter, Decremented,
    DecrementCounter, IncrementCounter, Incremented, ResetCounter,
};
pub use error::{BoxError, DomainError};
pub use publish::{DomainEventEnvelope, DomainEventPublisher, NoopPublisher};
pub use redelivery::{RedeliveryReport, redeliver_unpublished};
