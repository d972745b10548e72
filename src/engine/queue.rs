use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::storage::NodeType;

use super::worker::DistillationWorker;

/// One unit of distillation work: close the current round under a node.
#[derive(Debug, Clone)]
pub struct DistillationJob {
    /// Node whose round is being distilled.
    pub node_id: String,
    /// Whether the node is a topic or a summary.
    pub node_type: NodeType,
    /// Root topic of the tree, for summary attribution and cache keys.
    pub root_topic_id: String,
    /// Lock already held by the enqueuer; `None` on the retry path, where
    /// the worker re-acquires it.
    pub lock_id: Option<String>,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

impl DistillationJob {
    /// Job for a freshly triggered round, carrying the intake-held lock.
    pub fn triggered(
        node_id: impl Into<String>,
        node_type: NodeType,
        root_topic_id: impl Into<String>,
        lock_id: String,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            root_topic_id: root_topic_id.into(),
            lock_id: Some(lock_id),
            attempt: 1,
        }
    }

    /// Follow-up job after a failure. Carries no lock; the worker re-arms.
    pub fn retry_of(&self) -> Self {
        Self {
            node_id: self.node_id.clone(),
            node_type: self.node_type,
            root_topic_id: self.root_topic_id.clone(),
            lock_id: None,
            attempt: self.attempt + 1,
        }
    }
}

/// Deferred re-submission of failed distillation jobs.
#[async_trait]
pub trait RetryScheduler: Send + Sync {
    /// Re-enqueue a job after the delay. Best-effort: a full or closed
    /// queue drops the retry (the next full round re-triggers naturally).
    async fn schedule_retry(&self, job: DistillationJob, delay: Duration);
}

/// Sending side of the distillation queue.
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<DistillationJob>,
}

impl QueueHandle {
    /// Enqueue a job without waiting. Returns false if the queue is full
    /// or the dispatcher has shut down.
    pub fn enqueue(&self, job: DistillationJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Distillation queue rejected job");
                false
            }
        }
    }
}

#[async_trait]
impl RetryScheduler for QueueHandle {
    async fn schedule_retry(&self, job: DistillationJob, delay: Duration) {
        let sender = self.sender.clone();
        info!(
            node_id = %job.node_id,
            attempt = job.attempt,
            delay_secs = delay.as_secs(),
            "Distillation retry scheduled"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = sender.send(job).await {
                error!(error = %e, "Dropped scheduled retry, queue closed");
            }
        });
    }
}

/// Create the distillation queue: a bounded channel plus its receiving end.
///
/// The channel exists before the worker so the worker can hold a
/// `QueueHandle` for retries while the dispatcher holds the worker.
pub fn distillation_queue(capacity: usize) -> (QueueHandle, mpsc::Receiver<DistillationJob>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (QueueHandle { sender }, receiver)
}

/// Run the dispatcher: drain the queue, one supervised task per job.
///
/// Worker panics are contained to their task and logged; they never take
/// down the dispatcher. Returns when every sender is dropped.
pub fn spawn_dispatcher(
    mut receiver: mpsc::Receiver<DistillationJob>,
    worker: Arc<DistillationWorker>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Distillation dispatcher started");
        while let Some(job) = receiver.recv().await {
            debug!(node_id = %job.node_id, attempt = job.attempt, "Dispatching job");
            let worker = Arc::clone(&worker);
            let handle = tokio::spawn(async move {
                worker.run(job).await;
            });
            tokio::spawn(async move {
                if let Err(e) = handle.await {
                    error!(error = %e, "Distillation task aborted");
                }
            });
        }
        info!("Distillation dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_job_drops_lock_and_bumps_attempt() {
        let job = DistillationJob::triggered("t-1", NodeType::Topic, "t-1", "lock-1".to_string());
        assert_eq!(job.attempt, 1);
        assert!(job.lock_id.is_some());

        let retry = job.retry_of();
        assert_eq!(retry.attempt, 2);
        assert!(retry.lock_id.is_none());
        assert_eq!(retry.node_id, "t-1");
    }

    #[tokio::test]
    async fn test_enqueue_rejects_when_full() {
        let (handle, _receiver) = distillation_queue(1);
        let job = DistillationJob::triggered("t-1", NodeType::Topic, "t-1", "l".to_string());

        assert!(handle.enqueue(job.clone()));
        assert!(!handle.enqueue(job), "Second job must bounce off capacity 1");
    }

    #[tokio::test]
    async fn test_enqueue_rejects_after_close() {
        let (handle, receiver) = distillation_queue(4);
        drop(receiver);

        let job = DistillationJob::triggered("t-1", NodeType::Topic, "t-1", "l".to_string());
        assert!(!handle.enqueue(job));
    }
}
