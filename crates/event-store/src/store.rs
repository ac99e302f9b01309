use async_trait::async_trait;

use crate::{
    AggregateId, AggregateUpdate, DomainEventRecord, NewAggregate, RecordId, RecordQuery, Result,
    StoredAggregate,
};

/// Core trait for durable store implementations.
///
/// Reads happen outside of a transaction; every write that belongs to a
/// command commit goes through a [`StoreTransaction`] obtained from
/// [`DurableStore::begin`]. All implementations must be thread-safe.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// The transaction type handed out by [`begin`](DurableStore::begin).
    type Transaction: StoreTransaction;

    /// Opens a transaction.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Loads an aggregate row by type and id.
    ///
    /// Returns None if the aggregate doesn't exist.
    async fn find_aggregate(
        &self,
        aggregate_type: &str,
        id: AggregateId,
    ) -> Result<Option<StoredAggregate>>;

    /// Returns true if any record matches the query.
    async fn record_exists(&self, query: &RecordQuery) -> Result<bool>;

    /// Retrieves records matching the query, oldest first.
    async fn query_records(&self, query: &RecordQuery) -> Result<Vec<DomainEventRecord>>;

    /// Flips a committed record to published.
    async fn mark_published(&self, record_id: RecordId) -> Result<()>;
}

/// A unit of atomic writes against the durable store.
///
/// Nothing written through a transaction is visible to readers until
/// [`commit`](StoreTransaction::commit) succeeds.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Inserts a new aggregate row and returns the identity the store assigned.
    async fn add_aggregate(&mut self, aggregate: NewAggregate) -> Result<AggregateId>;

    /// Writes an existing aggregate row, guarded by its expected version.
    ///
    /// Fails with `ConcurrencyConflict` if another writer committed first.
    /// Increments the row's concurrency counter and refreshes `updated_at`.
    async fn update_aggregate(&mut self, update: AggregateUpdate) -> Result<()>;

    /// Inserts event records.
    async fn add_records(&mut self, records: &[DomainEventRecord]) -> Result<()>;

    /// Commits every write made through this transaction.
    async fn commit(self) -> Result<()>;

    /// Discards every write made through this transaction.
    async fn rollback(self) -> Result<()>;
}

/// Extension trait providing convenience methods for durable stores.
#[async_trait]
pub trait DurableStoreExt: DurableStore {
    /// Retrieves every record emitted for one aggregate, oldest first.
    async fn records_for_aggregate(
        &self,
        aggregate_type: &str,
        id: AggregateId,
    ) -> Result<Vec<DomainEventRecord>> {
        self.query_records(&RecordQuery::new().aggregate_type(aggregate_type).aggregate_id(id))
            .await
    }

    /// Checks if an aggregate row exists.
    async fn aggregate_exists(&self, aggregate_type: &str, id: AggregateId) -> Result<bool> {
        Ok(self.find_aggregate(aggregate_type, id).await?.is_some())
    }
}

// Blanket implementation for all DurableStore implementations
impl<T: DurableStore + ?Sized> DurableStoreExt for T {}

/// Error returned when a batch of records is not fit for appending.
#[derive(Debug, Clone)]
pub struct RecordValidationError {
    pub message: String,
}

impl std::fmt::Display for RecordValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Record validation error: {}", self.message)
    }
}

impl std::error::Error for RecordValidationError {}

/// Validates records before they are inserted.
///
/// A batch always belongs to one aggregate and carries consecutive versions.
pub fn validate_records(
    records: &[DomainEventRecord],
) -> std::result::Result<(), RecordValidationError> {
    let Some(first) = records.first() else {
        return Err(RecordValidationError {
            message: "Cannot append empty record list".to_string(),
        });
    };

    for record in records.iter().skip(1) {
        if record.aggregate_id != first.aggregate_id
            || record.aggregate_type != first.aggregate_type
        {
            return Err(RecordValidationError {
                message: "All records must be for the same aggregate".to_string(),
            });
        }
    }

    let mut expected_version = first.aggregate_version;
    for record in records.iter().skip(1) {
        expected_version = expected_version.next();
        if record.aggregate_version != expected_version {
            return Err(RecordValidationError {
                message: format!(
                    "Record versions must be sequential. Expected {}, got {}",
                    expected_version, record.aggregate_version
                ),
            });
        }
    }

    Ok(())
}
