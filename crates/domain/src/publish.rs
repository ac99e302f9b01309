//! The seam between committing events and delivering them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_store::{CommandParamsRecord, DomainEventRecord, RecordId, Version};

use crate::aggregate::DomainEvent;
use crate::context::CommandContext;

/// Delivers committed event records to their subscribers.
///
/// Called once per record after the commit succeeded. An `Err` means at
/// least one subscriber could not be reached; the record then stays
/// unpublished.
#[async_trait]
pub trait DomainEventPublisher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn publish(
        &self,
        record: &DomainEventRecord,
        ctx: &CommandContext,
    ) -> Result<(), Self::Error>;
}

#[async_trait]
impl<P: DomainEventPublisher + ?Sized> DomainEventPublisher for Arc<P> {
    type Error = P::Error;

    async fn publish(
        &self,
        record: &DomainEventRecord,
        ctx: &CommandContext,
    ) -> Result<(), Self::Error> {
        (**self).publish(record, ctx).await
    }
}

/// A publisher with no subscribers. Every publish succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl DomainEventPublisher for NoopPublisher {
    type Error = std::convert::Infallible;

    async fn publish(
        &self,
        _record: &DomainEventRecord,
        _ctx: &CommandContext,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A committed event decoded into its typed payload, as handed to event
/// handlers.
#[derive(Debug, Clone)]
pub struct DomainEventEnvelope<E> {
    pub record_id: RecordId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub aggregate_version: Version,
    pub command_type: String,
    pub command_params: CommandParamsRecord,
    pub timestamp: DateTime<Utc>,
    pub event: E,
}

impl<E: DomainEvent> DomainEventEnvelope<E> {
    /// Decodes a record's payload into `E`.
    pub fn from_record(record: &DomainEventRecord) -> Result<Self, serde_json::Error> {
        Ok(Self {
            record_id: record.id,
            aggregate_type: record.aggregate_type.clone(),
            aggregate_id: record.aggregate_id.clone(),
            aggregate_version: record.aggregate_version,
            command_type: record.command_type.clone(),
            command_params: record.command_params.clone(),
            timestamp: record.timestamp,
            event: serde_json::from_value(record.event_data.clone())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Incremented {
        by: i64,
    }

    impl DomainEvent for Incremented {
        fn event_type() -> &'static str {
            "Incremented"
        }
    }

    fn record(data: serde_json::Value) -> DomainEventRecord {
        DomainEventRecord::builder()
            .aggregate_type("Counter")
            .aggregate_id("a")
            .aggregate_version(Version::new(2))
            .command_type("IncrementCounter")
            .command_params(CommandParamsRecord::new("c7"))
            .event_type("Incremented")
            .event_data_raw(data)
            .try_build()
            .unwrap()
    }

    #[test]
    fn envelope_decodes_payload() {
        let record = record(serde_json::json!({"by": 3}));
        let envelope = DomainEventEnvelope::<Incremented>::from_record(&record).unwrap();

        assert_eq!(envelope.event, Incremented { by: 3 });
        assert_eq!(envelope.record_id, record.id);
        assert_eq!(envelope.aggregate_version, Version::new(2));
        assert_eq!(envelope.command_params.command_id, "c7");
    }

    #[test]
    fn envelope_rejects_foreign_payload() {
        let record = record(serde_json::json!({"name": "x"}));
        assert!(DomainEventEnvelope::<Incremented>::from_record(&record).is_err());
    }
}
