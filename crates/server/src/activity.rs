//! Demo subscriber: an activity feed built from committed counter events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    BoxError, CommandContext, Counter, CounterReset, Decremented, DomainEvent,
    DomainEventEnvelope, Incremented,
};
use publisher::{DomainEventHandler, HandlerOptions, HandlerRegistry, PublishError};
use serde::Serialize;
use tokio::sync::RwLock;

/// One line of the feed.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub counter_id: String,
    pub version: i64,
    pub event_type: String,
    pub delta: i64,
    pub command_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// In-memory feed of counter changes.
///
/// Increments and decrements are recorded in-process; resets are handled
/// strictly in the background.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Arc<RwLock<Vec<ActivityEntry>>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the feed's handlers.
    pub fn subscribe(&self, registry: &HandlerRegistry) -> Result<(), PublishError> {
        registry.register::<Counter, Incremented, _>(
            "activity-log.incremented",
            self.clone(),
            HandlerOptions::new(),
        )?;
        registry.register::<Counter, Decremented, _>(
            "activity-log.decremented",
            self.clone(),
            HandlerOptions::new(),
        )?;
        registry.register::<Counter, CounterReset, _>(
            "activity-log.reset",
            self.clone(),
            HandlerOptions::new().strictly_background(),
        )?;
        Ok(())
    }

    /// Entries for one counter, oldest first.
    pub async fn for_counter(&self, counter_id: &str) -> Vec<ActivityEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.counter_id == counter_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn append<E: DomainEvent>(&self, event: &DomainEventEnvelope<E>, delta: i64) {
        metrics::counter!("activity_entries_total", "event" => E::event_type()).increment(1);
        tracing::debug!(
            counter_id = %event.aggregate_id,
            event = E::event_type(),
            delta,
            "activity recorded"
        );
        self.entries.write().await.push(ActivityEntry {
            counter_id: event.aggregate_id.clone(),
            version: event.aggregate_version.as_i64(),
            event_type: E::event_type().to_string(),
            delta,
            command_id: event.command_params.command_id.clone(),
            recorded_at: event.timestamp,
        });
    }
}

#[async_trait]
impl DomainEventHandler<Incremented> for ActivityLog {
    async fn handle(
        &self,
        event: DomainEventEnvelope<Incremented>,
        _ctx: &CommandContext,
    ) -> Result<(), BoxError> {
        self.append(&event, event.event.by).await;
        Ok(())
    }
}

#[async_trait]
impl DomainEventHandler<Decremented> for ActivityLog {
    async fn handle(
        &self,
        event: DomainEventEnvelope<Decremented>,
        _ctx: &CommandContext,
    ) -> Result<(), BoxError> {
        self.append(&event, -event.event.by).await;
        Ok(())
    }
}

#[async_trait]
impl DomainEventHandler<CounterReset> for ActivityLog {
    async fn handle(
        &self,
        event: DomainEventEnvelope<CounterReset>,
        _ctx: &CommandContext,
    ) -> Result<(), BoxError> {
        self.append(&event, -event.event.previous).await;
        Ok(())
    }
}
