use thiserror::Error;

use crate::{AggregateId, RecordId, Version, store::RecordValidationError};

/// Errors that can occur when interacting with the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A guarded aggregate update lost a race with another writer.
    /// The stored version no longer matches the version the writer loaded.
    #[error(
        "Concurrency conflict for {aggregate_type} {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_type: String,
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The aggregate row was not found.
    #[error("Aggregate not found: {aggregate_type} {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: String,
        aggregate_id: AggregateId,
    },

    /// The event record was not found.
    #[error("Domain event record not found: {0}")]
    RecordNotFound(RecordId),

    /// A batch of records failed validation before insertion.
    #[error(transparent)]
    InvalidRecords(#[from] RecordValidationError),

    /// The store refused the operation (used by the in-memory store's
    /// failure injection and for closed transactions).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for durable store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
