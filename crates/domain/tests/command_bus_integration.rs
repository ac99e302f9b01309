//! Integration tests for the command bus.
//!
//! These tests drive the Counter aggregate through the full create/modify
//! flows against the in-memory store: idempotency, optimistic concurrency,
//! handler failures and post-commit delivery.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::AggregateId;
use domain::{
    Aggregate, CommandBus, CommandContext, CommandHandler, CommandHandlers, CommandParams,
    Counter, CounterCommandHandler, CreateCounter, DecrementCounter, DomainError,
    DomainEventPublisher, IncrementCounter, NoopPublisher, ResetCounter,
};
use event_store::{
    DomainEventRecord, DurableStore, DurableStoreExt, InMemoryDurableStore, RecordQuery, Version,
};

fn counter_handlers() -> CommandHandlers {
    let mut handlers = CommandHandlers::new();
    CounterCommandHandler::register(&mut handlers);
    handlers
}

/// Helper to create a bus over a fresh in-memory store
fn create_bus() -> CommandBus<InMemoryDurableStore, NoopPublisher> {
    CommandBus::new(InMemoryDurableStore::new(), counter_handlers(), NoopPublisher)
}

async fn create_counter<P: DomainEventPublisher>(
    bus: &CommandBus<InMemoryDurableStore, P>,
    command_id: &str,
) -> AggregateId {
    bus.create(
        CreateCounter::new(CommandParams::new(command_id), 1),
        &CommandContext::root(),
    )
    .await
    .unwrap()
    .aggregate
    .id()
    .unwrap()
}

#[derive(Debug, thiserror::Error)]
#[error("subscriber unreachable")]
struct SubscriberUnreachable;

/// Records every publish call and optionally fails them all.
#[derive(Clone, Default)]
struct RecordingPublisher {
    seen: Arc<Mutex<Vec<(String, u32)>>>,
    fail: bool,
}

impl RecordingPublisher {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn seen(&self) -> Vec<(String, u32)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DomainEventPublisher for RecordingPublisher {
    type Error = SubscriberUnreachable;

    async fn publish(
        &self,
        record: &DomainEventRecord,
        ctx: &CommandContext,
    ) -> Result<(), SubscriberUnreachable> {
        self.seen
            .lock()
            .unwrap()
            .push((record.event_type.clone(), ctx.publish().nest_level()));
        if self.fail {
            Err(SubscriberUnreachable)
        } else {
            Ok(())
        }
    }
}

mod create_flow {
    use super::*;

    #[tokio::test]
    async fn counter_example_records_one_unpublished_event() {
        let store = InMemoryDurableStore::new();
        let bus = CommandBus::new(store.clone(), counter_handlers(), RecordingPublisher::failing());

        let result = bus
            .create(
                CreateCounter::new(CommandParams::new("c1"), 1),
                &CommandContext::root(),
            )
            .await
            .unwrap();

        assert_eq!(result.aggregate.version(), Version::first());
        assert_eq!(result.aggregate.value(), 1);

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "Incremented");
        assert_eq!(records[0].command_type, "CreateCounter");
        assert_eq!(records[0].command_params.command_id, "c1");
        assert_eq!(records[0].aggregate_version, Version::first());
        assert!(!records[0].published);
    }

    #[tokio::test]
    async fn successful_delivery_marks_record_published() {
        let store = InMemoryDurableStore::new();
        let publisher = RecordingPublisher::default();
        let bus = CommandBus::new(store.clone(), counter_handlers(), publisher.clone());

        let result = bus
            .create(
                CreateCounter::new(CommandParams::new("c1"), 1),
                &CommandContext::root(),
            )
            .await
            .unwrap();

        assert!(result.records[0].published);
        assert!(store.records().await[0].published);
        assert_eq!(publisher.seen(), [("Incremented".to_string(), 0)]);
    }

    #[tokio::test]
    async fn resubmitting_command_id_is_rejected() {
        let bus = create_bus();
        create_counter(&bus, "c1").await;

        let err = bus
            .create(
                CreateCounter::new(CommandParams::new("c1"), 1),
                &CommandContext::root(),
            )
            .await
            .unwrap_err();

        match err {
            DomainError::CommandAlreadyHandled {
                aggregate_type,
                aggregate_id,
                command_type,
                command_id,
            } => {
                assert_eq!(aggregate_type, "Counter");
                assert_eq!(aggregate_id, None);
                assert_eq!(command_type, "CreateCounter");
                assert_eq!(command_id, "c1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(bus.store().record_count().await, 1);
        assert_eq!(bus.store().aggregate_count().await, 1);
    }

    #[tokio::test]
    async fn blank_command_id_is_rejected() {
        let bus = create_bus();

        let result = bus
            .create(
                CreateCounter::new(CommandParams::new("  "), 1),
                &CommandContext::root(),
            )
            .await;

        assert!(matches!(result, Err(DomainError::EmptyCommandId)));
        assert_eq!(bus.store().record_count().await, 0);
    }

    #[tokio::test]
    async fn missing_handler_is_reported() {
        let bus = CommandBus::new(
            InMemoryDurableStore::new(),
            CommandHandlers::new(),
            NoopPublisher,
        );

        let result = bus
            .create(
                CreateCounter::new(CommandParams::new("c1"), 1),
                &CommandContext::root(),
            )
            .await;

        assert!(matches!(
            result,
            Err(DomainError::HandlerNotRegistered {
                command_type: "CreateCounter"
            })
        ));
    }

    #[tokio::test]
    async fn duplicate_handlers_are_reported() {
        let mut handlers = counter_handlers();
        handlers.register::<CreateCounter, _>(CounterCommandHandler);
        let bus = CommandBus::new(InMemoryDurableStore::new(), handlers, NoopPublisher);

        let result = bus
            .create(
                CreateCounter::new(CommandParams::new("c1"), 1),
                &CommandContext::root(),
            )
            .await;

        assert!(matches!(
            result,
            Err(DomainError::TooManyHandlersRegistered { count: 2, .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_caller_commits_nothing() {
        let bus = create_bus();
        let ctx = CommandContext::root();
        ctx.cancellation().cancel();

        let result = bus
            .create(CreateCounter::new(CommandParams::new("c1"), 1), &ctx)
            .await;

        assert!(matches!(result, Err(DomainError::Cancelled)));
        assert_eq!(bus.store().record_count().await, 0);
    }

    #[tokio::test]
    async fn command_params_are_persisted_with_records() {
        let bus = create_bus();
        let params = CommandParams::new("c1")
            .with_correlation_id("flow-9")
            .originating_ip_address("192.0.2.4")
            .originating_application("tests")
            .with_metadata("tenant", "acme");

        bus.create(CreateCounter::new(params, 2), &CommandContext::root())
            .await
            .unwrap();

        let record = &bus.store().records().await[0];
        assert_eq!(record.command_params.correlation_id, "flow-9");
        assert_eq!(
            record.command_params.originating_ip_address.as_deref(),
            Some("192.0.2.4")
        );
        assert_eq!(record.command_params.metadata["tenant"], "acme");
        assert_eq!(record.event_data, serde_json::json!({"by": 2}));
    }
}

mod modify_flow {
    use super::*;

    #[tokio::test]
    async fn increments_existing_counter() {
        let bus = create_bus();
        let id = create_counter(&bus, "c1").await;

        let result = bus
            .modify(
                IncrementCounter::new(CommandParams::new("c2"), id, 4),
                &CommandContext::root(),
            )
            .await
            .unwrap();

        assert_eq!(result.aggregate.value(), 5);
        assert_eq!(result.new_version(), Version::new(2));

        let stored = bus.store().find_aggregate("Counter", id).await.unwrap().unwrap();
        assert_eq!(stored.version, Version::new(2));
        assert_eq!(stored.concurrency_version, 1);

        let records = bus.store().records_for_aggregate("Counter", id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].aggregate_version, Version::new(2));
    }

    #[tokio::test]
    async fn missing_aggregate_is_reported() {
        let bus = create_bus();
        let id = AggregateId::new();

        let result = bus
            .modify(
                IncrementCounter::new(CommandParams::new("c2"), id, 1),
                &CommandContext::root(),
            )
            .await;

        assert!(matches!(
            result,
            Err(DomainError::AggregateDoesNotExist { aggregate_id, .. }) if aggregate_id == id
        ));
    }

    #[tokio::test]
    async fn stale_expected_version_is_rejected_without_persisting() {
        let bus = create_bus();
        let id = create_counter(&bus, "c1").await;
        bus.modify(
            IncrementCounter::new(CommandParams::new("c2"), id, 1),
            &CommandContext::root(),
        )
        .await
        .unwrap();

        let result = bus
            .modify(
                IncrementCounter::new(
                    CommandParams::new("c3").expect_version(Version::first()),
                    id,
                    1,
                ),
                &CommandContext::root(),
            )
            .await;

        assert!(matches!(
            result,
            Err(DomainError::AggregateVersionMismatch { expected, actual })
                if expected == Version::first() && actual == Version::new(2)
        ));
        assert_eq!(bus.store().record_count().await, 2);
        let stored = bus.store().find_aggregate("Counter", id).await.unwrap().unwrap();
        assert_eq!(stored.version, Version::new(2));
    }

    #[tokio::test]
    async fn matching_expected_version_is_accepted() {
        let bus = create_bus();
        let id = create_counter(&bus, "c1").await;

        let result = bus
            .modify(
                IncrementCounter::new(
                    CommandParams::new("c2").expect_version(Version::first()),
                    id,
                    1,
                ),
                &CommandContext::root(),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn idempotency_is_scoped_by_aggregate() {
        let bus = create_bus();
        let first = create_counter(&bus, "c1").await;
        let second = create_counter(&bus, "c2").await;

        bus.modify(
            IncrementCounter::new(CommandParams::new("inc"), first, 1),
            &CommandContext::root(),
        )
        .await
        .unwrap();

        // Same command id on another aggregate is a different command.
        bus.modify(
            IncrementCounter::new(CommandParams::new("inc"), second, 1),
            &CommandContext::root(),
        )
        .await
        .unwrap();

        let result = bus
            .modify(
                IncrementCounter::new(CommandParams::new("inc"), first, 1),
                &CommandContext::root(),
            )
            .await;

        assert!(matches!(
            result,
            Err(DomainError::CommandAlreadyHandled { aggregate_id: Some(id), .. }) if id == first
        ));
    }

    #[tokio::test]
    async fn rejected_command_persists_nothing() {
        let bus = create_bus();
        let id = create_counter(&bus, "c1").await;

        let result = bus
            .modify(
                DecrementCounter::new(CommandParams::new("c2"), id, 5),
                &CommandContext::root(),
            )
            .await;

        assert!(matches!(result, Err(DomainError::Rejected(_))));
        assert_eq!(bus.store().record_count().await, 1);

        // The same command id may be retried once the state allows it.
        bus.modify(
            IncrementCounter::new(CommandParams::new("c3"), id, 9),
            &CommandContext::root(),
        )
        .await
        .unwrap();
        let result = bus
            .modify(
                DecrementCounter::new(CommandParams::new("c2"), id, 5),
                &CommandContext::root(),
            )
            .await
            .unwrap();
        assert_eq!(result.aggregate.value(), 5);
    }

    #[tokio::test]
    async fn command_without_events_commits_nothing() {
        let bus = create_bus();
        let id = create_counter(&bus, "c1").await;
        bus.modify(
            ResetCounter::new(CommandParams::new("c2"), id),
            &CommandContext::root(),
        )
        .await
        .unwrap();

        let result = bus
            .modify(
                ResetCounter::new(CommandParams::new("c3"), id),
                &CommandContext::root(),
            )
            .await
            .unwrap();

        assert!(result.records.is_empty());
        assert_eq!(bus.store().record_count().await, 2);
    }

    #[tokio::test]
    async fn concurrent_writers_lose_with_version_mismatch() {
        let store = InMemoryDurableStore::new();
        let bus = Arc::new(CommandBus::new(
            store.clone(),
            counter_handlers(),
            NoopPublisher,
        ));
        let id = create_counter(&bus, "c1").await;

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    bus.modify(
                        IncrementCounter::new(CommandParams::new(format!("inc-{i}")), id, 1),
                        &CommandContext::root(),
                    )
                    .await
                })
            })
            .collect();

        let mut succeeded = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(DomainError::AggregateVersionMismatch { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        let stored = store.find_aggregate("Counter", id).await.unwrap().unwrap();
        assert!(succeeded >= 1);
        assert_eq!(stored.version, Version::new(1 + succeeded));
        assert_eq!(stored.state["value"], 1 + succeeded);
        assert_eq!(store.record_count().await, 1 + succeeded as usize);
    }
}

mod publishing {
    use super::*;

    /// A handler that issues a nested command from inside event delivery.
    struct CascadingPublisher {
        bus: Mutex<Option<Arc<CommandBus<InMemoryDurableStore, Arc<CascadingPublisher>>>>>,
        levels: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl DomainEventPublisher for CascadingPublisher {
        type Error = SubscriberUnreachable;

        async fn publish(
            &self,
            record: &DomainEventRecord,
            ctx: &CommandContext,
        ) -> Result<(), SubscriberUnreachable> {
            self.levels.lock().unwrap().push(ctx.publish().nest_level());
            let bus = self.bus.lock().unwrap().clone();
            if let Some(bus) = bus
                && ctx.publish().nest_level() < 2
            {
                let id: AggregateId = record.aggregate_id.parse().unwrap();
                let command_id = format!("cascade-{}", ctx.publish().nest_level());
                bus.modify(
                    IncrementCounter::new(CommandParams::new(command_id), id, 1),
                    &ctx.nested(),
                )
                .await
                .map_err(|_| SubscriberUnreachable)?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn nested_commands_publish_one_level_deeper() {
        let publisher = Arc::new(CascadingPublisher {
            bus: Mutex::new(None),
            levels: Mutex::new(Vec::new()),
        });
        let bus = Arc::new(CommandBus::new(
            InMemoryDurableStore::new(),
            counter_handlers(),
            publisher.clone(),
        ));
        *publisher.bus.lock().unwrap() = Some(bus.clone());

        let result = bus
            .create(
                CreateCounter::new(CommandParams::new("c1"), 1),
                &CommandContext::root(),
            )
            .await
            .unwrap();

        assert_eq!(*publisher.levels.lock().unwrap(), [0, 1, 2]);
        let id = result.aggregate.id().unwrap();
        let stored = bus.store().find_aggregate("Counter", id).await.unwrap().unwrap();
        assert_eq!(stored.state["value"], 3);
        assert!(bus.store().records().await.iter().all(|r| r.published));

        // Break the Arc cycle between bus and publisher.
        publisher.bus.lock().unwrap().take();
    }

    #[tokio::test]
    async fn delivery_failure_does_not_fail_the_command() {
        let store = InMemoryDurableStore::new();
        let bus = CommandBus::new(store.clone(), counter_handlers(), RecordingPublisher::failing());
        let id = create_counter(&bus, "c1").await;

        let result = bus
            .modify(
                IncrementCounter::new(CommandParams::new("c2"), id, 1),
                &CommandContext::root(),
            )
            .await
            .unwrap();

        assert!(!result.records[0].published);
        let unpublished = store.query_records(&RecordQuery::unpublished()).await.unwrap();
        assert_eq!(unpublished.len(), 2);
    }

    #[tokio::test]
    async fn redelivery_publishes_owed_records() {
        let store = InMemoryDurableStore::new();
        let failing = CommandBus::new(store.clone(), counter_handlers(), RecordingPublisher::failing());
        create_counter(&failing, "c1").await;
        create_counter(&failing, "c2").await;

        let publisher = RecordingPublisher::default();
        let report = domain::redeliver_unpublished(&store, &publisher, 10)
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.undelivered, 0);
        assert_eq!(publisher.seen().len(), 2);
        assert!(store.records().await.iter().all(|r| r.published));
    }
}

mod handler_failure {
    use super::*;
    use domain::{Incremented, TrackedAggregate};

    /// Emits an event and then fails, leaving a dirty aggregate behind.
    struct HalfwayHandler;

    #[async_trait]
    impl CommandHandler<IncrementCounter> for HalfwayHandler {
        async fn handle(
            &self,
            counter: &mut Counter,
            command: &IncrementCounter,
        ) -> Result<(), DomainError> {
            counter.emit(Incremented { by: command.by })?;
            Err(DomainError::rejected("downstream refused"))
        }
    }

    #[tokio::test]
    async fn failing_handler_persists_nothing() {
        let store = InMemoryDurableStore::new();
        let setup = CommandBus::new(store.clone(), counter_handlers(), NoopPublisher);
        let id = create_counter(&setup, "c1").await;

        let handlers = CommandHandlers::new().with::<IncrementCounter, _>(HalfwayHandler);
        let bus = CommandBus::new(store.clone(), handlers, NoopPublisher);

        let result = bus
            .modify(
                IncrementCounter::new(CommandParams::new("c2"), id, 1),
                &CommandContext::root(),
            )
            .await;

        assert!(matches!(result, Err(DomainError::Rejected(_))));
        let stored = store.find_aggregate("Counter", id).await.unwrap().unwrap();
        assert_eq!(stored.version, Version::first());
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn command_after_failure_starts_from_stored_state() {
        let store = InMemoryDurableStore::new();
        let setup = CommandBus::new(store.clone(), counter_handlers(), NoopPublisher);
        let id = create_counter(&setup, "c1").await;

        let handlers = CommandHandlers::new().with::<IncrementCounter, _>(HalfwayHandler);
        let failing = CommandBus::new(store.clone(), handlers, NoopPublisher);
        let _ = failing
            .modify(
                IncrementCounter::new(CommandParams::new("c2"), id, 5),
                &CommandContext::root(),
            )
            .await;

        let result = setup
            .modify(
                IncrementCounter::new(CommandParams::new("c3"), id, 1),
                &CommandContext::root(),
            )
            .await
            .unwrap();

        assert_eq!(result.aggregate.value(), 2);
        assert_eq!(result.aggregate.version(), Version::new(2));
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].aggregate_version, Version::new(2));
    }

    #[tokio::test]
    async fn tracked_aggregate_keeps_loaded_version() {
        let store = InMemoryDurableStore::new();
        let bus = CommandBus::new(store.clone(), counter_handlers(), NoopPublisher);
        let id = create_counter(&bus, "c1").await;

        let stored = store.find_aggregate("Counter", id).await.unwrap().unwrap();
        let mut tracked = TrackedAggregate::<Counter>::load(stored).unwrap();
        tracked.aggregate_mut().increment(3).unwrap();

        assert_eq!(tracked.loaded_version(), Version::first());
        assert_eq!(tracked.aggregate().version(), Version::new(2));
        assert_eq!(tracked.into_inner().value(), 4);
    }
}
