//! The publisher wired into the command bus.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{CommandContext, DomainEventPublisher};
use event_store::DomainEventRecord;

use crate::circuit::{CircuitBreaker, CircuitState};
use crate::config::PublisherConfig;
use crate::error::PublishError;
use crate::executor::RecipeExecutor;
use crate::flags::FeatureFlags;
use crate::queue::BackgroundQueue;
use crate::recipe::{RecipeDecision, RecipeInputs, select_recipe};
use crate::registry::HandlerRegistry;

/// Delivers each committed record to every handler registered for it,
/// choosing per handler between in-process and queued execution.
#[derive(Clone)]
pub struct RecipeEventPublisher {
    registry: Arc<HandlerRegistry>,
    breaker: Arc<CircuitBreaker>,
    flags: Arc<dyn FeatureFlags>,
    executor: Arc<RecipeExecutor>,
    max_nest_level: u32,
}

impl RecipeEventPublisher {
    pub fn new(
        config: &PublisherConfig,
        registry: Arc<HandlerRegistry>,
        queue: Arc<dyn BackgroundQueue>,
        flags: Arc<dyn FeatureFlags>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
        let executor = Arc::new(RecipeExecutor::new(
            registry.clone(),
            queue,
            breaker.clone(),
            config.suppress_local_timeouts,
        ));
        Self {
            registry,
            breaker,
            flags,
            executor,
            max_nest_level: config.max_nest_level,
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl DomainEventPublisher for RecipeEventPublisher {
    type Error = PublishError;

    #[tracing::instrument(
        skip_all,
        fields(
            record_id = %record.id,
            aggregate = %record.aggregate_type,
            event = %record.event_type,
            nest_level = ctx.publish().nest_level(),
        )
    )]
    async fn publish(
        &self,
        record: &DomainEventRecord,
        ctx: &CommandContext,
    ) -> Result<(), PublishError> {
        let descriptors = self
            .registry
            .descriptors(&record.aggregate_type, &record.event_type);
        if descriptors.is_empty() {
            tracing::trace!("no handlers subscribed");
            return Ok(());
        }

        let inputs = RecipeInputs {
            circuit_open: self.breaker.state() == CircuitState::Open,
            local_enabled: self.flags.local_domain_event_handling_enabled(),
            nest_level: ctx.publish().nest_level(),
            max_nest_level: self.max_nest_level,
        };
        if inputs.circuit_open && !inputs.local_enabled {
            tracing::error!("queue circuit is open and local handling is disabled");
            return Err(PublishError::CircuitOpenLocalDisabled {
                record_id: record.id,
                event_type: record.event_type.clone(),
            });
        }

        let handler_ctx = ctx.nested();
        let mut undelivered = Vec::new();
        for descriptor in descriptors.iter() {
            let recipe = match select_recipe(descriptor, &inputs) {
                RecipeDecision::Execute(recipe) => recipe,
                RecipeDecision::Abort => {
                    undelivered.push(descriptor.handler_id.clone());
                    continue;
                }
            };

            if !self
                .executor
                .execute(&recipe, descriptor, record, &handler_ctx)
                .await?
            {
                tracing::warn!(handler = %descriptor.handler_id, "every delivery recipe failed");
                undelivered.push(descriptor.handler_id.clone());
            }
        }

        if undelivered.is_empty() {
            Ok(())
        } else {
            Err(PublishError::Undelivered {
                record_id: record.id,
                handlers: undelivered,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::StaticFeatureFlags;
    use crate::queue::InMemoryBackgroundQueue;
    use crate::registry::{DomainEventHandler, HandlerOptions};
    use domain::{BoxError, Counter, DomainEventEnvelope, Incremented, PublishContext};
    use event_store::{CommandParamsRecord, Version};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        levels: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl DomainEventHandler<Incremented> for Arc<Recording> {
        async fn handle(
            &self,
            _event: DomainEventEnvelope<Incremented>,
            ctx: &CommandContext,
        ) -> Result<(), BoxError> {
            self.levels.lock().unwrap().push(ctx.publish().nest_level());
            Ok(())
        }
    }

    fn record() -> DomainEventRecord {
        DomainEventRecord::builder()
            .aggregate_type("Counter")
            .aggregate_id("a")
            .aggregate_version(Version::first())
            .command_type("CreateCounter")
            .command_params(CommandParamsRecord::new("c1"))
            .event_type("Incremented")
            .event_data_raw(serde_json::json!({ "by": 1 }))
            .try_build()
            .unwrap()
    }

    fn publisher(
        queue: Arc<InMemoryBackgroundQueue>,
        flags: Arc<StaticFeatureFlags>,
    ) -> (RecipeEventPublisher, Arc<Recording>) {
        let config = PublisherConfig::default();
        let registry = Arc::new(HandlerRegistry::new(config.default_local_timeout));
        let recording = Arc::new(Recording::default());
        registry
            .register::<Counter, Incremented, _>(
                "recording",
                recording.clone(),
                HandlerOptions::new(),
            )
            .unwrap();
        (
            RecipeEventPublisher::new(&config, registry, queue, flags),
            recording,
        )
    }

    #[tokio::test]
    async fn handlers_run_one_level_deeper() {
        let queue = Arc::new(InMemoryBackgroundQueue::new());
        let (publisher, recording) =
            publisher(queue.clone(), Arc::new(StaticFeatureFlags::default()));
        let ctx = CommandContext::root().with_publish_context(PublishContext::at_level(2));

        publisher.publish(&record(), &ctx).await.unwrap();

        assert_eq!(*recording.levels.lock().unwrap(), [3]);
        assert_eq!(queue.submitted(), 0);
    }

    #[tokio::test]
    async fn record_without_handlers_is_delivered() {
        let (publisher, _) = publisher(
            Arc::new(InMemoryBackgroundQueue::new()),
            Arc::new(StaticFeatureFlags::default()),
        );
        let mut other = record();
        other.event_type = "Decremented".to_string();

        assert!(publisher.publish(&other, &CommandContext::root()).await.is_ok());
    }

    #[tokio::test]
    async fn open_circuit_with_local_disabled_invokes_nothing() {
        let queue = Arc::new(InMemoryBackgroundQueue::new());
        let (publisher, recording) =
            publisher(queue.clone(), Arc::new(StaticFeatureFlags::new(false)));
        publisher.circuit_breaker().record_failure();
        publisher.circuit_breaker().record_failure();

        let result = publisher.publish(&record(), &CommandContext::root()).await;

        assert!(matches!(
            result,
            Err(PublishError::CircuitOpenLocalDisabled { .. })
        ));
        assert!(recording.levels.lock().unwrap().is_empty());
        assert_eq!(queue.submitted(), 0);
    }

    #[tokio::test]
    async fn max_nest_level_goes_to_the_queue() {
        let queue = Arc::new(InMemoryBackgroundQueue::new());
        let (publisher, recording) =
            publisher(queue.clone(), Arc::new(StaticFeatureFlags::default()));
        let ctx = CommandContext::root().with_publish_context(PublishContext::at_level(4));

        publisher.publish(&record(), &ctx).await.unwrap();

        assert!(recording.levels.lock().unwrap().is_empty());
        assert_eq!(queue.pending(), 1);
    }
}
