//! Job queue seam and an in-process tokio implementation.
//!
//! Delivery only needs two primitives from a queue: run a job now, and run a
//! job after a delay. A durable backend implements [`JobQueue`]; the
//! [`TokioJobQueue`] here is in-memory and loses pending jobs on restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use crate::error::{WebhookError, WebhookResult};
use crate::models::DeliveryJob;

/// Queue that webhook delivery jobs are placed on.
pub const DELIVERY_QUEUE: &str = "webhooks";

/// Enqueue/schedule primitives offered by a job backend.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Make a job runnable immediately.
    async fn enqueue(&self, queue: &str, job: DeliveryJob) -> WebhookResult<()>;

    /// Make a job runnable after `delay`.
    async fn schedule(&self, queue: &str, job: DeliveryJob, delay: Duration) -> WebhookResult<()>;
}

/// Executes one job taken off a queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: DeliveryJob);
}

/// A job together with the queue it was placed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub queue: String,
    pub job: DeliveryJob,
}

/// Bounded in-process queue over a tokio mpsc channel.
#[derive(Clone)]
pub struct TokioJobQueue {
    sender: mpsc::Sender<QueuedJob>,
}

/// Receiving side of a [`TokioJobQueue`].
pub struct JobReceiver {
    receiver: mpsc::Receiver<QueuedJob>,
}

impl JobReceiver {
    /// Next runnable job, or `None` once every queue handle is dropped.
    pub async fn recv(&mut self) -> Option<QueuedJob> {
        self.receiver.recv().await
    }
}

impl TokioJobQueue {
    /// Create a queue holding at most `capacity` runnable jobs.
    pub fn new(capacity: usize) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, JobReceiver { receiver })
    }
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    /// Never waits: a full queue is an error so callers on the write path
    /// are not blocked behind delivery backlog.
    async fn enqueue(&self, queue: &str, job: DeliveryJob) -> WebhookResult<()> {
        self.sender
            .try_send(QueuedJob {
                queue: queue.to_string(),
                job,
            })
            .map_err(|e| WebhookError::Queue(format!("Failed to enqueue job: {e}")))
    }

    async fn schedule(&self, queue: &str, job: DeliveryJob, delay: Duration) -> WebhookResult<()> {
        if self.sender.is_closed() {
            return Err(WebhookError::Queue("Job queue is closed".to_string()));
        }

        let sender = self.sender.clone();
        let queued = QueuedJob {
            queue: queue.to_string(),
            job,
        };

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let subscription_id = queued.job.subscription_id;
            if sender.send(queued).await.is_err() {
                tracing::warn!(
                    target: "webhook_delivery",
                    subscription_id = %subscription_id,
                    "Dropping scheduled job: queue closed"
                );
            }
        });

        Ok(())
    }
}

/// Drains a [`JobReceiver`], running each job on its own task.
pub struct JobRunner {
    queue: String,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
}

impl JobRunner {
    /// Runner for jobs on `queue`, at most `concurrency` at a time.
    pub fn new(queue: impl Into<String>, handler: Arc<dyn JobHandler>, concurrency: usize) -> Self {
        Self {
            queue: queue.into(),
            handler,
            concurrency: concurrency.max(1),
        }
    }

    /// Process jobs until the channel closes, then wait for in-flight jobs.
    pub async fn run(self, mut receiver: JobReceiver) {
        tracing::info!(
            target: "webhook_delivery",
            queue = %self.queue,
            concurrency = self.concurrency,
            "Starting job runner"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        while let Some(queued) = receiver.recv().await {
            if queued.queue != self.queue {
                tracing::warn!(
                    target: "webhook_delivery",
                    queue = %queued.queue,
                    expected = %self.queue,
                    "Dropping job for unknown queue"
                );
                continue;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let handler = Arc::clone(&self.handler);
            let job = queued.job;
            let subscription_id = job.subscription_id;

            tokio::spawn(async move {
                let _permit = permit; // Hold permit until the job completes
                let task = tokio::spawn(async move { handler.handle(job).await });
                if let Err(e) = task.await {
                    tracing::error!(
                        target: "webhook_delivery",
                        subscription_id = %subscription_id,
                        error = %e,
                        "Delivery job panicked"
                    );
                }
            });
        }

        // Wait for in-flight jobs to complete
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
        tracing::info!(target: "webhook_delivery", queue = %self.queue, "Job runner stopped");
    }
}
