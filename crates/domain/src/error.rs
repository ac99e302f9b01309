//! Domain error types.

use common::AggregateId;
use event_store::{StoreError, Version};
use thiserror::Error;

/// Boxed error returned by command handlers that reject a command.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while handling a command.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The command carried a missing or blank command id.
    #[error("Command id must not be empty")]
    EmptyCommandId,

    /// A record for the same idempotency key already exists.
    #[error(
        "Command {command_type} with id {command_id} was already handled for {aggregate_type}{}",
        .aggregate_id.as_ref().map(|id| format!(" {id}")).unwrap_or_default()
    )]
    CommandAlreadyHandled {
        aggregate_type: &'static str,
        aggregate_id: Option<AggregateId>,
        command_type: &'static str,
        command_id: String,
    },

    /// A modify command targeted an aggregate that doesn't exist.
    #[error("Aggregate does not exist: {aggregate_type} with id {aggregate_id}")]
    AggregateDoesNotExist {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// The expected version differs from the stored one.
    #[error("Aggregate version mismatch: expected {expected}, actual {actual}")]
    AggregateVersionMismatch { expected: Version, actual: Version },

    /// No handler is registered for the command type.
    #[error("No handler registered for command {command_type}")]
    HandlerNotRegistered { command_type: &'static str },

    /// More than one handler is registered for the command type.
    #[error("{count} handlers registered for command {command_type}, expected exactly one")]
    TooManyHandlersRegistered {
        command_type: &'static str,
        count: usize,
    },

    /// The aggregate has no apply function for an emitted event.
    #[error("Aggregate {aggregate_type} cannot apply event {event_type}")]
    UnhandledEventType {
        aggregate_type: &'static str,
        event_type: &'static str,
    },

    /// The command handler refused the command.
    #[error("Command rejected: {0}")]
    Rejected(#[source] BoxError),

    /// The caller cancelled the command before it was committed.
    #[error("Command cancelled")]
    Cancelled,

    /// An error occurred in the durable store.
    #[error("Store error: {0}")]
    Store(#[source] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Wraps a handler's own error.
    pub fn rejected(err: impl Into<BoxError>) -> Self {
        DomainError::Rejected(err.into())
    }

    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::EmptyCommandId => "empty_command_id",
            DomainError::CommandAlreadyHandled { .. } => "already_handled",
            DomainError::AggregateDoesNotExist { .. } => "aggregate_does_not_exist",
            DomainError::AggregateVersionMismatch { .. } => "version_mismatch",
            DomainError::HandlerNotRegistered { .. } => "handler_not_registered",
            DomainError::TooManyHandlersRegistered { .. } => "too_many_handlers",
            DomainError::UnhandledEventType { .. } => "unhandled_event_type",
            DomainError::Rejected(_) => "rejected",
            DomainError::Cancelled => "cancelled",
            DomainError::Store(_) => "store",
            DomainError::Serialization(_) => "serialization",
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict {
                expected, actual, ..
            } => DomainError::AggregateVersionMismatch { expected, actual },
            StoreError::Serialization(err) => DomainError::Serialization(err),
            other => DomainError::Store(other),
        }
    }
}
