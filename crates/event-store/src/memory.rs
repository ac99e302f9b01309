use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as SyncRwLock, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    AggregateId, AggregateUpdate, DomainEventRecord, NewAggregate, RecordId, RecordQuery, Result,
    StoreError, StoredAggregate,
    store::{DurableStore, StoreTransaction, validate_records},
};

type AggregateKey = (String, AggregateId);

#[derive(Debug, Default)]
struct InMemoryState {
    aggregates: HashMap<AggregateKey, StoredAggregate>,
    records: Vec<DomainEventRecord>,
}

#[derive(Debug, Default)]
struct FailurePlan {
    fail_on_add_records: bool,
    fail_on_commit: bool,
    fail_on_rollback: bool,
    fail_on_mark_published: bool,
}

/// In-memory durable store for tests and local runs.
///
/// Transactions stage their writes and apply them under one write lock on
/// commit, re-checking every guarded update against the committed state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDurableStore {
    state: Arc<RwLock<InMemoryState>>,
    failures: Arc<SyncRwLock<FailurePlan>>,
}

impl InMemoryDurableStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of committed records.
    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Returns every committed record in insertion order.
    pub async fn records(&self) -> Vec<DomainEventRecord> {
        self.state.read().await.records.clone()
    }

    /// Returns the number of committed aggregate rows.
    pub async fn aggregate_count(&self) -> usize {
        self.state.read().await.aggregates.len()
    }

    /// Makes every `add_records` call fail.
    pub fn set_fail_on_add_records(&self, fail: bool) {
        self.failures_mut().fail_on_add_records = fail;
    }

    /// Makes every `commit` call fail.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.failures_mut().fail_on_commit = fail;
    }

    /// Makes every `rollback` call fail.
    pub fn set_fail_on_rollback(&self, fail: bool) {
        self.failures_mut().fail_on_rollback = fail;
    }

    /// Makes every `mark_published` call fail.
    pub fn set_fail_on_mark_published(&self, fail: bool) {
        self.failures_mut().fail_on_mark_published = fail;
    }

    fn failures_mut(&self) -> RwLockWriteGuard<'_, FailurePlan> {
        self.failures.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected(&self, pick: impl Fn(&FailurePlan) -> bool) -> bool {
        pick(&self.failures.read().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        Ok(InMemoryTransaction {
            store: self.clone(),
            inserts: Vec::new(),
            updates: Vec::new(),
            records: Vec::new(),
        })
    }

    async fn find_aggregate(
        &self,
        aggregate_type: &str,
        id: AggregateId,
    ) -> Result<Option<StoredAggregate>> {
        let state = self.state.read().await;
        Ok(state
            .aggregates
            .get(&(aggregate_type.to_string(), id))
            .cloned())
    }

    async fn record_exists(&self, query: &RecordQuery) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.records.iter().any(|r| query.matches(r)))
    }

    async fn query_records(&self, query: &RecordQuery) -> Result<Vec<DomainEventRecord>> {
        let state = self.state.read().await;
        let records = state.records.iter().filter(|r| query.matches(r)).cloned();

        let records = if let Some(limit) = query.limit {
            records.take(limit).collect()
        } else {
            records.collect()
        };

        Ok(records)
    }

    async fn mark_published(&self, record_id: RecordId) -> Result<()> {
        if self.injected(|f| f.fail_on_mark_published) {
            return Err(StoreError::Unavailable(
                "injected mark_published failure".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or(StoreError::RecordNotFound(record_id))?;
        record.mark_published();
        Ok(())
    }
}

/// Staged writes of one in-memory transaction.
#[derive(Debug)]
pub struct InMemoryTransaction {
    store: InMemoryDurableStore,
    inserts: Vec<StoredAggregate>,
    updates: Vec<AggregateUpdate>,
    records: Vec<DomainEventRecord>,
}

fn check_expected_version(
    aggregates: &HashMap<AggregateKey, StoredAggregate>,
    update: &AggregateUpdate,
) -> Result<()> {
    let row = aggregates
        .get(&(update.aggregate_type.clone(), update.id))
        .ok_or_else(|| StoreError::AggregateNotFound {
            aggregate_type: update.aggregate_type.clone(),
            aggregate_id: update.id,
        })?;

    if row.version != update.expected_version {
        return Err(StoreError::ConcurrencyConflict {
            aggregate_type: update.aggregate_type.clone(),
            aggregate_id: update.id,
            expected: update.expected_version,
            actual: row.version,
        });
    }

    Ok(())
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn add_aggregate(&mut self, aggregate: NewAggregate) -> Result<AggregateId> {
        let id = AggregateId::new();
        let now = Utc::now();
        self.inserts.push(StoredAggregate {
            aggregate_type: aggregate.aggregate_type,
            id,
            version: aggregate.version,
            concurrency_version: 0,
            created_at: now,
            updated_at: now,
            state: aggregate.state,
        });
        Ok(id)
    }

    async fn update_aggregate(&mut self, update: AggregateUpdate) -> Result<()> {
        {
            let state = self.store.state.read().await;
            check_expected_version(&state.aggregates, &update)?;
        }
        self.updates.push(update);
        Ok(())
    }

    async fn add_records(&mut self, records: &[DomainEventRecord]) -> Result<()> {
        if self.store.injected(|f| f.fail_on_add_records) {
            return Err(StoreError::Unavailable(
                "injected add_records failure".to_string(),
            ));
        }
        validate_records(records)?;
        self.records.extend_from_slice(records);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        if self.store.injected(|f| f.fail_on_commit) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        let mut state = self.store.state.write().await;

        // Another transaction may have committed since the update was staged.
        for update in &self.updates {
            check_expected_version(&state.aggregates, update)?;
        }

        for row in self.inserts {
            state
                .aggregates
                .insert((row.aggregate_type.clone(), row.id), row);
        }

        let now = Utc::now();
        for update in self.updates {
            if let Some(row) = state
                .aggregates
                .get_mut(&(update.aggregate_type.clone(), update.id))
            {
                row.version = update.new_version;
                row.state = update.state;
                row.concurrency_version += 1;
                row.updated_at = now;
            }
        }

        state.records.extend(self.records);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        if self.store.injected(|f| f.fail_on_rollback) {
            return Err(StoreError::Unavailable(
                "injected rollback failure".to_string(),
            ));
        }
        Ok(())
    }
}
