//! Runs a recipe chain for one handler until a step delivers.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use domain::CommandContext;
use event_store::DomainEventRecord;
use futures_util::FutureExt;

use crate::circuit::CircuitBreaker;
use crate::error::{HandlerError, PublishError, QueueError};
use crate::queue::{BackgroundQueue, DeliveryJob};
use crate::recipe::{ExecutionRecipe, Strategy};
use crate::registry::{HandlerDescriptor, HandlerId, HandlerRegistry};

/// Executes recipes against the handler registry and the background queue.
pub struct RecipeExecutor {
    registry: Arc<HandlerRegistry>,
    queue: Arc<dyn BackgroundQueue>,
    breaker: Arc<CircuitBreaker>,
    suppress_local_timeouts: bool,
}

impl RecipeExecutor {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        queue: Arc<dyn BackgroundQueue>,
        breaker: Arc<CircuitBreaker>,
        suppress_local_timeouts: bool,
    ) -> Self {
        Self {
            registry,
            queue,
            breaker,
            suppress_local_timeouts,
        }
    }

    /// Tries each step of `recipe` in turn.
    ///
    /// Returns `Ok(true)` once a step delivers and `Ok(false)` when the chain
    /// is exhausted. Only wiring errors are returned as `Err`.
    #[tracing::instrument(
        skip_all,
        fields(handler = %descriptor.handler_id, record_id = %record.id)
    )]
    pub async fn execute(
        &self,
        recipe: &ExecutionRecipe,
        descriptor: &HandlerDescriptor,
        record: &DomainEventRecord,
        ctx: &CommandContext,
    ) -> Result<bool, PublishError> {
        for step in recipe.chain() {
            let delivered = match step.strategy() {
                Strategy::Local => {
                    self.run_local(&descriptor.handler_id, step.timeout(), record, ctx)
                        .await
                }
                Strategy::Queued => self.run_queued(&descriptor.handler_id, record).await?,
            };
            if delivered {
                return Ok(true);
            }
            tracing::debug!(strategy = ?step.strategy(), "recipe step failed");
        }
        Ok(false)
    }

    async fn run_local(
        &self,
        handler_id: &HandlerId,
        timeout: Option<Duration>,
        record: &DomainEventRecord,
        ctx: &CommandContext,
    ) -> bool {
        let invocation_ctx = ctx.child();
        let outcome = match timeout.filter(|_| !self.suppress_local_timeouts) {
            Some(limit) => {
                let invocation = self.invoke_guarded(handler_id, record, &invocation_ctx);
                match tokio::time::timeout(limit, invocation).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        invocation_ctx.cancellation().cancel();
                        Err(HandlerError::TimedOut(limit))
                    }
                }
            }
            None => {
                self.invoke_guarded(handler_id, record, &invocation_ctx)
                    .await
            }
        };

        match outcome {
            Ok(()) => true,
            Err(err) => {
                metrics::counter!("recipe_local_failures_total", "handler" => handler_id.to_string())
                    .increment(1);
                tracing::warn!(error = %err, "local event handling failed");
                false
            }
        }
    }

    /// Invokes the handler, turning panics and cancellation into errors.
    async fn invoke_guarded(
        &self,
        handler_id: &HandlerId,
        record: &DomainEventRecord,
        ctx: &CommandContext,
    ) -> Result<(), HandlerError> {
        let invocation =
            AssertUnwindSafe(self.registry.invoke(handler_id, record, ctx)).catch_unwind();
        tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => Err(HandlerError::Cancelled),
            result = invocation => result.unwrap_or_else(|panic| {
                Err(HandlerError::Panicked(panic_message(panic.as_ref())))
            }),
        }
    }

    async fn run_queued(
        &self,
        handler_id: &HandlerId,
        record: &DomainEventRecord,
    ) -> Result<bool, PublishError> {
        let Some(permit) = self.breaker.try_acquire() else {
            tracing::debug!("queue circuit is open, not submitting");
            return Ok(false);
        };

        if !self.registry.contains(handler_id) {
            return Err(PublishError::Wiring(format!(
                "handler {handler_id} is not registered"
            )));
        }

        let job = DeliveryJob::new(handler_id.clone(), record.clone());
        let job_id = job.job_id;
        // Cancelled here, the dropped permit frees a half-open trial slot.
        match self.queue.submit(job).await {
            Ok(()) => {
                permit.succeeded();
                tracing::debug!(%job_id, "event handling queued");
                Ok(true)
            }
            Err(QueueError::Wiring(reason)) => Err(PublishError::Wiring(reason)),
            Err(err) => {
                permit.failed();
                metrics::counter!("recipe_queue_failures_total", "handler" => handler_id.to_string())
                    .increment(1);
                tracing::error!(error = %err, "failed to queue event handling");
                Ok(false)
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
