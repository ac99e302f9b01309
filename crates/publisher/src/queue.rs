//! Background queue seam and its in-memory implementation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use event_store::DomainEventRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::QueueError;
use crate::registry::HandlerId;

/// One handler invocation deferred to a queue worker.
///
/// Carries everything needed to run the handler in another process: the
/// handler's registry id and the committed record with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub job_id: Uuid,
    pub handler_id: HandlerId,
    pub record: DomainEventRecord,
    /// Deliveries already attempted; `0` for a fresh job.
    pub attempt: u32,
}

impl DeliveryJob {
    pub fn new(handler_id: HandlerId, record: DomainEventRecord) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            handler_id,
            record,
            attempt: 0,
        }
    }

    /// The same job, queued for another attempt.
    pub fn retry(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

/// Where queued deliveries are submitted.
#[async_trait]
pub trait BackgroundQueue: Send + Sync {
    async fn submit(&self, job: DeliveryJob) -> Result<(), QueueError>;
}

/// Where workers pull queued deliveries from.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Waits for the next job. `None` means the source is exhausted.
    async fn next_job(&self) -> Option<DeliveryJob>;
}

/// In-process queue holding jobs in their serialized form.
///
/// Useful for tests and single-node deployments. Submission failures can be
/// injected to exercise the circuit breaker.
#[derive(Debug, Default)]
pub struct InMemoryBackgroundQueue {
    jobs: Mutex<VecDeque<String>>,
    available: Notify,
    submitted: AtomicUsize,
    fail_submissions: AtomicBool,
}

impl InMemoryBackgroundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following submission fail as unavailable.
    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Number of jobs accepted so far, including retries.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Number of jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Removes and returns a waiting job without blocking.
    pub fn try_next_job(&self) -> Option<DeliveryJob> {
        loop {
            let payload = self.lock().pop_front()?;
            match serde_json::from_str(&payload) {
                Ok(job) => return Some(job),
                Err(err) => tracing::error!(error = %err, "discarding undecodable queued job"),
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BackgroundQueue for InMemoryBackgroundQueue {
    async fn submit(&self, job: DeliveryJob) -> Result<(), QueueError> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable(
                "injected submission failure".to_string(),
            ));
        }

        let payload = serde_json::to_string(&job).map_err(|e| QueueError::Wiring(e.to_string()))?;
        self.lock().push_back(payload);
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.available.notify_one();

        tracing::debug!(job_id = %job.job_id, handler = %job.handler_id, "job queued");
        Ok(())
    }
}

#[async_trait]
impl JobSource for InMemoryBackgroundQueue {
    async fn next_job(&self) -> Option<DeliveryJob> {
        loop {
            if let Some(job) = self.try_next_job() {
                return Some(job);
            }
            self.available.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{CommandParamsRecord, Version};

    fn job() -> DeliveryJob {
        let record = DomainEventRecord::builder()
            .aggregate_type("Counter")
            .aggregate_id("a")
            .aggregate_version(Version::first())
            .command_type("CreateCounter")
            .command_params(CommandParamsRecord::new("c1"))
            .event_type("Incremented")
            .event_data_raw(serde_json::json!({ "by": 1 }))
            .try_build()
            .unwrap();
        DeliveryJob::new(HandlerId::new("audit"), record)
    }

    #[tokio::test]
    async fn jobs_come_out_in_submission_order() {
        let queue = InMemoryBackgroundQueue::new();
        let first = job();
        let second = job();

        queue.submit(first.clone()).await.unwrap();
        queue.submit(second.clone()).await.unwrap();

        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.next_job().await, Some(first));
        assert_eq!(queue.next_job().await, Some(second));
        assert_eq!(queue.submitted(), 2);
    }

    #[tokio::test]
    async fn next_job_waits_for_a_submission() {
        let queue = std::sync::Arc::new(InMemoryBackgroundQueue::new());
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next_job().await }
        });

        tokio::task::yield_now().await;
        let submitted = job();
        queue.submit(submitted.clone()).await.unwrap();

        assert_eq!(waiter.await.unwrap(), Some(submitted));
    }

    #[tokio::test]
    async fn injected_failure_rejects_without_queueing() {
        let queue = InMemoryBackgroundQueue::new();
        queue.set_fail_submissions(true);

        let result = queue.submit(job()).await;

        assert!(matches!(result, Err(QueueError::Unavailable(_))));
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.submitted(), 0);
    }

    #[test]
    fn retry_bumps_attempt_and_keeps_identity() {
        let original = job();
        let retried = original.clone().retry();

        assert_eq!(retried.attempt, 1);
        assert_eq!(retried.job_id, original.job_id);
    }
}
