//! Durable commit of a command's events, followed by their delivery.

use common::AggregateId;
use event_store::{
    AggregateUpdate, DomainEventRecord, DurableStore, NewAggregate, RecordId, StoreTransaction,
    Version,
};

use crate::aggregate::{Aggregate, AggregateEvent};
use crate::command::CommandParams;
use crate::context::CommandContext;
use crate::error::DomainError;
use crate::publish::DomainEventPublisher;

/// How the aggregate row is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingWrite {
    /// A new aggregate; the store assigns its id.
    Insert,
    /// An existing aggregate, guarded by the version it was loaded at.
    Update {
        id: AggregateId,
        expected_version: Version,
    },
}

/// Persists an aggregate and its events in one transaction, then hands each
/// committed record to the publisher.
pub struct Committer<S, P> {
    store: S,
    publisher: P,
}

impl<S, P> Committer<S, P>
where
    S: DurableStore,
    P: DomainEventPublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Commits the aggregate's uncommitted events.
    ///
    /// Returns the committed records with their `published` flags as left by
    /// delivery. A command that emitted nothing commits nothing and returns
    /// an empty list. Delivery failures never fail the commit.
    #[tracing::instrument(
        skip_all,
        fields(aggregate = A::aggregate_type(), command = command_type)
    )]
    pub async fn commit<A: Aggregate>(
        &self,
        aggregate: &mut A,
        write: PendingWrite,
        command_type: &'static str,
        params: &CommandParams,
        ctx: &CommandContext,
    ) -> Result<Vec<DomainEventRecord>, DomainError> {
        let events = aggregate.flush_events();
        if events.is_empty() {
            tracing::warn!("command produced no events, nothing to commit");
            return Ok(Vec::new());
        }

        let mut tx = self.store.begin().await?;
        let written =
            Self::write(&mut tx, aggregate, write, &events, command_type, params, ctx).await;
        let mut records = match written {
            Ok(records) => records,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(
                        error = %err,
                        rollback_error = %rollback_err,
                        "CRITICAL: transaction rollback failed"
                    );
                }
                return Err(err);
            }
        };
        tx.commit().await?;

        metrics::counter!("domain_events_committed_total", "aggregate" => A::aggregate_type())
            .increment(records.len() as u64);
        tracing::debug!(events = records.len(), "events committed");

        for record in records.iter_mut() {
            deliver(&self.store, &self.publisher, record, ctx).await;
        }

        Ok(records)
    }

    async fn write<A: Aggregate>(
        tx: &mut S::Transaction,
        aggregate: &mut A,
        write: PendingWrite,
        events: &[AggregateEvent],
        command_type: &'static str,
        params: &CommandParams,
        ctx: &CommandContext,
    ) -> Result<Vec<DomainEventRecord>, DomainError> {
        let id = match write {
            PendingWrite::Insert => {
                let row =
                    NewAggregate::from_state(A::aggregate_type(), aggregate.version(), &*aggregate)?;
                let id = tx.add_aggregate(row).await?;
                aggregate.root_mut().assign_id(id);
                id
            }
            PendingWrite::Update {
                id,
                expected_version,
            } => {
                let update = AggregateUpdate::from_state(
                    A::aggregate_type(),
                    id,
                    expected_version,
                    aggregate.version(),
                    &*aggregate,
                )?;
                tx.update_aggregate(update).await?;
                id
            }
        };

        let params = params.to_record();
        let records: Vec<DomainEventRecord> = events
            .iter()
            .map(|event| DomainEventRecord {
                id: RecordId::new(),
                aggregate_type: A::aggregate_type().to_string(),
                aggregate_id: id.to_string(),
                aggregate_version: event.version(),
                command_type: command_type.to_string(),
                command_params: params.clone(),
                event_type: event.event_type().to_string(),
                event_data: event.payload().clone(),
                timestamp: event.timestamp(),
                published: false,
            })
            .collect();

        tx.add_records(&records).await?;

        if ctx.is_cancelled() {
            return Err(DomainError::Cancelled);
        }

        Ok(records)
    }
}

/// Publishes one committed record and marks it published on success.
///
/// Returns whether the publisher delivered it. Failing to flip the flag is
/// logged only; the record is then simply delivered again later.
pub(crate) async fn deliver<S, P>(
    store: &S,
    publisher: &P,
    record: &mut DomainEventRecord,
    ctx: &CommandContext,
) -> bool
where
    S: DurableStore,
    P: DomainEventPublisher,
{
    match publisher.publish(record, ctx).await {
        Ok(()) => {
            metrics::counter!("domain_events_published_total").increment(1);
            match store.mark_published(record.id).await {
                Ok(()) => record.mark_published(),
                Err(err) => tracing::error!(
                    record_id = %record.id,
                    error = %err,
                    "failed to mark record published"
                ),
            }
            true
        }
        Err(err) => {
            metrics::counter!("domain_events_unpublished_total").increment(1);
            tracing::warn!(
                record_id = %record.id,
                event_type = %record.event_type,
                error = %err,
                "event delivery failed, record left unpublished"
            );
            false
        }
    }
}
