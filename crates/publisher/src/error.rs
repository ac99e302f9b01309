//! Error types for event delivery.

use std::time::Duration;

use domain::BoxError;
use event_store::RecordId;
use thiserror::Error;

use crate::registry::HandlerId;

/// Errors returned by [`RecipeEventPublisher`](crate::RecipeEventPublisher)
/// and handler registration.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The queue is circuit-broken and in-process handling is switched off,
    /// so no handler could be attempted.
    #[error(
        "Cannot deliver {event_type} record {record_id}: queue circuit is open and local handling is disabled"
    )]
    CircuitOpenLocalDisabled {
        record_id: RecordId,
        event_type: String,
    },

    /// At least one handler's recipe chain was exhausted.
    #[error("Record {record_id} was not delivered to {}", join_ids(.handlers))]
    Undelivered {
        record_id: RecordId,
        handlers: Vec<HandlerId>,
    },

    /// Delivery is misconfigured; retrying cannot help.
    #[error("Delivery wiring error: {0}")]
    Wiring(String),

    #[error("Handler {0} is already registered")]
    DuplicateHandler(HandlerId),
}

/// Errors from submitting a job to a background queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue could not take the job right now.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// The job can never be accepted, e.g. it does not serialize.
    #[error("Queue wiring error: {0}")]
    Wiring(String),
}

/// Why a single handler invocation failed.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("No handler registered under {0}")]
    UnknownHandler(HandlerId),

    #[error("Failed to decode event payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Handler failed: {0}")]
    Failed(#[source] BoxError),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("Handler timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Handler cancelled")]
    Cancelled,
}

fn join_ids(ids: &[HandlerId]) -> String {
    ids.iter()
        .map(HandlerId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
