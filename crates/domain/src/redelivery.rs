//! Re-publishing records whose delivery never succeeded.

use event_store::{DurableStore, RecordQuery};

use crate::committer::deliver;
use crate::context::CommandContext;
use crate::error::DomainError;
use crate::publish::DomainEventPublisher;

/// Outcome of one redelivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedeliveryReport {
    pub delivered: usize,
    pub undelivered: usize,
}

/// Publishes up to `limit` unpublished records, oldest first.
///
/// Each record starts a fresh causal chain. Records the publisher accepts
/// are marked published; the rest stay owed.
#[tracing::instrument(skip(store, publisher))]
pub async fn redeliver_unpublished<S, P>(
    store: &S,
    publisher: &P,
    limit: usize,
) -> Result<RedeliveryReport, DomainError>
where
    S: DurableStore,
    P: DomainEventPublisher,
{
    let records = store
        .query_records(&RecordQuery::unpublished().limit(limit))
        .await?;

    let mut report = RedeliveryReport::default();
    for mut record in records {
        if deliver(store, publisher, &mut record, &CommandContext::root()).await {
            report.delivered += 1;
        } else {
            report.undelivered += 1;
        }
    }

    tracing::info!(
        delivered = report.delivered,
        undelivered = report.undelivered,
        "redelivery pass finished"
    );
    Ok(report)
}
