//! Background workers draining the delivery queue.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use domain::CommandContext;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::HandlerError;
use crate::executor::panic_message;
use crate::queue::{BackgroundQueue, DeliveryJob, JobSource};
use crate::registry::HandlerRegistry;

/// Pulls queued jobs and runs them through the handler registry.
///
/// Failed jobs go back on the queue until they have been attempted
/// `max_attempts` times.
pub struct QueueWorker {
    registry: Arc<HandlerRegistry>,
    source: Arc<dyn JobSource>,
    queue: Arc<dyn BackgroundQueue>,
    max_attempts: u32,
}

impl QueueWorker {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        source: Arc<dyn JobSource>,
        queue: Arc<dyn BackgroundQueue>,
        max_attempts: u32,
    ) -> Self {
        Self {
            registry,
            source,
            queue,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Starts `workers` tasks that run until `shutdown` changes or the source
    /// is exhausted.
    pub fn spawn(self, workers: usize, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let worker = Arc::new(self);
        (0..workers.max(1))
            .map(|index| {
                let worker = worker.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker.run(index, shutdown).await })
            })
            .collect()
    }

    #[tracing::instrument(skip(self, shutdown))]
    async fn run(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("queue worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                job = self.source.next_job() => match job {
                    Some(job) => {
                        self.process(job).await;
                    }
                    None => break,
                },
            }
        }
        tracing::info!("queue worker stopped");
    }

    /// Runs one job in a fresh causal chain. Returns whether it succeeded.
    #[tracing::instrument(
        skip_all,
        fields(job_id = %job.job_id, handler = %job.handler_id, attempt = job.attempt)
    )]
    pub async fn process(&self, job: DeliveryJob) -> bool {
        let ctx = CommandContext::root();
        let outcome = AssertUnwindSafe(self.registry.invoke(&job.handler_id, &job.record, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

        let err = match outcome {
            Ok(()) => {
                metrics::counter!("queue_jobs_processed_total").increment(1);
                tracing::debug!("queued job processed");
                return true;
            }
            Err(err) => err,
        };

        let attempts = job.attempt + 1;
        if matches!(err, HandlerError::UnknownHandler(_)) || attempts >= self.max_attempts {
            metrics::counter!("queue_jobs_dropped_total").increment(1);
            tracing::error!(error = %err, attempts, "dropping queued job");
            return false;
        }

        tracing::warn!(error = %err, attempts, "queued job failed, retrying");
        if let Err(submit_err) = self.queue.submit(job.retry()).await {
            metrics::counter!("queue_jobs_dropped_total").increment(1);
            tracing::error!(error = %submit_err, "failed to requeue job");
        }
        false
    }
}
