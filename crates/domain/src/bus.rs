//! Command dispatch: validation, idempotency, handler invocation and commit.

use std::sync::Arc;
use std::time::Instant;

use event_store::{DomainEventRecord, DurableStore, RecordQuery, StoredAggregate, Version};

use crate::aggregate::Aggregate;
use crate::command::{Command, CommandHandler, CommandHandlers, ModifyCommand};
use crate::committer::{Committer, PendingWrite};
use crate::context::CommandContext;
use crate::error::DomainError;
use crate::publish::DomainEventPublisher;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after the command's events were applied.
    pub aggregate: A,

    /// The records committed for the command, in emission order.
    pub records: Vec<DomainEventRecord>,
}

impl<A: Aggregate> CommandResult<A> {
    pub fn new_version(&self) -> Version {
        self.aggregate.version()
    }
}

/// A loaded aggregate together with the version it was loaded at.
///
/// The bus owns the instance for one command. A failed handler drops it, so
/// its state, version and uncommitted events never outlive the failure and
/// the next command reloads from the store.
#[derive(Debug, Clone)]
pub struct TrackedAggregate<A> {
    current: A,
    loaded_version: Version,
}

impl<A: Aggregate> TrackedAggregate<A> {
    /// Rebuilds an aggregate from its stored row.
    pub fn load(stored: StoredAggregate) -> Result<Self, DomainError> {
        let mut aggregate: A = serde_json::from_value(stored.state)?;
        aggregate.root_mut().restore(stored.id, stored.version);
        Ok(Self::new(aggregate))
    }

    pub fn new(aggregate: A) -> Self {
        Self {
            loaded_version: aggregate.version(),
            current: aggregate,
        }
    }

    pub fn aggregate(&self) -> &A {
        &self.current
    }

    pub fn aggregate_mut(&mut self) -> &mut A {
        &mut self.current
    }

    pub fn loaded_version(&self) -> Version {
        self.loaded_version
    }

    pub fn into_inner(self) -> A {
        self.current
    }
}

/// Routes commands to their handlers and commits the resulting events.
pub struct CommandBus<S, P> {
    store: S,
    handlers: Arc<CommandHandlers>,
    committer: Committer<S, P>,
}

impl<S, P> CommandBus<S, P>
where
    S: DurableStore + Clone,
    P: DomainEventPublisher,
{
    /// Creates a new command bus over the given store and publisher.
    pub fn new(store: S, handlers: CommandHandlers, publisher: P) -> Self {
        Self {
            committer: Committer::new(store.clone(), publisher),
            handlers: Arc::new(handlers),
            store,
        }
    }

    /// Returns a reference to the underlying durable store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        self.committer.publisher()
    }

    /// Handles a command that creates a new aggregate.
    #[tracing::instrument(
        skip_all,
        fields(
            aggregate = <C::Aggregate as Aggregate>::aggregate_type(),
            command = C::command_type(),
            command_id = %command.params().command_id,
            correlation_id = %command.params().correlation_id(),
            nest_level = ctx.publish().nest_level(),
        )
    )]
    pub async fn create<C: Command>(
        &self,
        command: C,
        ctx: &CommandContext,
    ) -> Result<CommandResult<C::Aggregate>, DomainError> {
        let start = Instant::now();
        let result = self.handle_create(&command, ctx).await;
        observe(C::command_type(), start, &result);
        result
    }

    /// Handles a command against an existing aggregate.
    #[tracing::instrument(
        skip_all,
        fields(
            aggregate = <C::Aggregate as Aggregate>::aggregate_type(),
            aggregate_id = %command.aggregate_id(),
            command = C::command_type(),
            command_id = %command.params().command_id,
            correlation_id = %command.params().correlation_id(),
            nest_level = ctx.publish().nest_level(),
        )
    )]
    pub async fn modify<C: ModifyCommand>(
        &self,
        command: C,
        ctx: &CommandContext,
    ) -> Result<CommandResult<C::Aggregate>, DomainError> {
        let start = Instant::now();
        let result = self.handle_modify(&command, ctx).await;
        observe(C::command_type(), start, &result);
        result
    }

    async fn handle_create<C: Command>(
        &self,
        command: &C,
        ctx: &CommandContext,
    ) -> Result<CommandResult<C::Aggregate>, DomainError> {
        let params = command.params();
        if params.has_blank_command_id() {
            return Err(DomainError::EmptyCommandId);
        }

        self.ensure_not_handled::<C>(None, &params.command_id).await?;

        let mut aggregate = C::Aggregate::default();
        let handler = self.handlers.resolve::<C>()?;
        invoke(handler.as_ref(), &mut aggregate, command, ctx).await?;

        let records = self
            .committer
            .commit(
                &mut aggregate,
                PendingWrite::Insert,
                C::command_type(),
                params,
                ctx,
            )
            .await?;

        Ok(CommandResult { aggregate, records })
    }

    async fn handle_modify<C: ModifyCommand>(
        &self,
        command: &C,
        ctx: &CommandContext,
    ) -> Result<CommandResult<C::Aggregate>, DomainError> {
        let aggregate_type = <C::Aggregate as Aggregate>::aggregate_type();
        let id = command.aggregate_id();

        let stored = self
            .store
            .find_aggregate(aggregate_type, id)
            .await?
            .ok_or(DomainError::AggregateDoesNotExist {
                aggregate_type,
                aggregate_id: id,
            })?;
        let mut tracked = TrackedAggregate::<C::Aggregate>::load(stored)?;

        let params = command.params();
        if let Some(expected) = params.expected_version
            && expected != tracked.loaded_version()
        {
            return Err(DomainError::AggregateVersionMismatch {
                expected,
                actual: tracked.loaded_version(),
            });
        }

        if params.has_blank_command_id() {
            return Err(DomainError::EmptyCommandId);
        }

        self.ensure_not_handled::<C>(Some(id), &params.command_id).await?;

        let handler = self.handlers.resolve::<C>()?;
        invoke(handler.as_ref(), tracked.aggregate_mut(), command, ctx).await?;

        let expected_version = tracked.loaded_version();
        let mut aggregate = tracked.into_inner();
        let records = self
            .committer
            .commit(
                &mut aggregate,
                PendingWrite::Update {
                    id,
                    expected_version,
                },
                C::command_type(),
                params,
                ctx,
            )
            .await?;

        Ok(CommandResult { aggregate, records })
    }

    async fn ensure_not_handled<C: Command>(
        &self,
        aggregate_id: Option<common::AggregateId>,
        command_id: &str,
    ) -> Result<(), DomainError> {
        let aggregate_type = <C::Aggregate as Aggregate>::aggregate_type();
        let key = RecordQuery::idempotency_key(
            aggregate_type,
            aggregate_id.map(|id| id.to_string()),
            C::command_type(),
            command_id,
        );

        if self.store.record_exists(&key).await? {
            return Err(DomainError::CommandAlreadyHandled {
                aggregate_type,
                aggregate_id,
                command_type: C::command_type(),
                command_id: command_id.to_string(),
            });
        }
        Ok(())
    }
}

/// Runs the handler unless the caller cancels first.
async fn invoke<C: Command>(
    handler: &dyn CommandHandler<C>,
    aggregate: &mut C::Aggregate,
    command: &C,
    ctx: &CommandContext,
) -> Result<(), DomainError> {
    if ctx.is_cancelled() {
        return Err(DomainError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => Err(DomainError::Cancelled),
        result = handler.handle(aggregate, command) => result,
    }
}

fn observe<T>(command_type: &'static str, start: Instant, result: &Result<T, DomainError>) {
    metrics::histogram!("command_duration_seconds", "command" => command_type)
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(_) => {
            metrics::counter!("commands_handled_total", "command" => command_type).increment(1);
            tracing::info!("command handled");
        }
        Err(err) => {
            metrics::counter!(
                "commands_rejected_total",
                "command" => command_type,
                "reason" => err.kind()
            )
            .increment(1);
            tracing::warn!(error = %err, "command failed");
        }
    }
}
