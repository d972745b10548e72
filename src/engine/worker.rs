use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::ai::{ensure_valid_digest, Summarizer};
use crate::error::EngineError;
use crate::storage::{NodeType, Storage, Summary, TopicStatus};

use super::cache::{tree_cache_key, TreeCache};
use super::lock::DistillationLock;
use super::notify::{LoopEvent, Notifier};
use super::queue::{DistillationJob, RetryScheduler};

/// Background worker that closes a full round: summarizes its comments and
/// persists the resulting summary node.
///
/// The worker owns the failure path end to end. A failed run reopens the
/// node (status rollback + lock release), notifies, and schedules a delayed
/// retry; nothing propagates back to the submission that triggered it.
pub struct DistillationWorker {
    storage: Arc<dyn Storage>,
    summarizer: Arc<dyn Summarizer>,
    lock: Arc<dyn DistillationLock>,
    notifier: Arc<dyn Notifier>,
    scheduler: Arc<dyn RetryScheduler>,
    cache: Arc<dyn TreeCache>,
    threshold: i64,
    retry_delay: Duration,
}

impl DistillationWorker {
    /// Wire the worker to its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn Storage>,
        summarizer: Arc<dyn Summarizer>,
        lock: Arc<dyn DistillationLock>,
        notifier: Arc<dyn Notifier>,
        scheduler: Arc<dyn RetryScheduler>,
        cache: Arc<dyn TreeCache>,
        threshold: i64,
        retry_delay_secs: u64,
    ) -> Self {
        Self {
            storage,
            summarizer,
            lock,
            notifier,
            scheduler,
            cache,
            threshold,
            retry_delay: Duration::from_secs(retry_delay_secs),
        }
    }

    /// Execute one distillation job to completion. Never returns an error;
    /// every failure is handled inside (rollback, notify, retry).
    pub async fn run(&self, job: DistillationJob) {
        let lock_id = match self.arm(&job).await {
            Some(lock_id) => lock_id,
            None => return,
        };

        match self.distill(&job).await {
            Ok(Some(summary_id)) => {
                self.lock.release(&job.node_id, job.node_type, &lock_id).await;
                self.cache
                    .invalidate_prefix(&tree_cache_key(&job.root_topic_id))
                    .await;
                self.notifier
                    .notify(LoopEvent::LoopCompleted {
                        node_id: job.node_id.clone(),
                        node_type: job.node_type,
                        summary_id,
                    })
                    .await;
            }
            Ok(None) => {
                // Stale trigger or already-completed topic: reopen quietly.
                self.reopen(&job).await;
                self.lock.release(&job.node_id, job.node_type, &lock_id).await;
            }
            Err(e) => {
                error!(
                    node_id = %job.node_id,
                    attempt = job.attempt,
                    error = %e,
                    "Distillation run failed"
                );
                self.reopen(&job).await;
                self.lock.release(&job.node_id, job.node_type, &lock_id).await;
                self.notifier
                    .notify(LoopEvent::DistillationFailed {
                        node_id: job.node_id.clone(),
                        node_type: job.node_type,
                        error: e.to_string(),
                        attempt: job.attempt,
                    })
                    .await;
                self.scheduler
                    .schedule_retry(job.retry_of(), self.retry_delay)
                    .await;
            }
        }
    }

    /// Ensure the node is locked for this run. Intake-triggered jobs carry
    /// their lock; retry jobs re-acquire and re-lock here. Returns `None`
    /// when the run should silently stand down.
    async fn arm(&self, job: &DistillationJob) -> Option<String> {
        if let Some(lock_id) = &job.lock_id {
            return Some(lock_id.clone());
        }

        let lock_id = match self.lock.try_acquire(&job.node_id, job.node_type).await {
            Some(lock_id) => lock_id,
            None => {
                info!(node_id = %job.node_id, "Retry stood down, node busy");
                return None;
            }
        };

        if job.node_type == NodeType::Topic {
            let locked = match self
                .storage
                .compare_and_set_topic_status(&job.node_id, TopicStatus::Active, TopicStatus::Locked)
                .await
            {
                Ok(locked) => locked,
                Err(e) => {
                    error!(node_id = %job.node_id, error = %e, "Retry re-lock failed");
                    false
                }
            };

            if !locked {
                info!(node_id = %job.node_id, "Retry stood down, topic not active");
                self.lock.release(&job.node_id, job.node_type, &lock_id).await;
                return None;
            }
        }

        Some(lock_id)
    }

    /// The distillation itself. `Ok(Some(id))` on a persisted summary,
    /// `Ok(None)` when the run turned out to be unnecessary.
    async fn distill(&self, job: &DistillationJob) -> Result<Option<String>, EngineError> {
        let completed_rounds = self
            .storage
            .count_summaries_for_parent(&job.node_id, job.node_type)
            .await?;
        let offset = completed_rounds * self.threshold;

        let window = self
            .storage
            .get_round_window(&job.node_id, job.node_type, offset, self.threshold)
            .await?;

        if (window.len() as i64) < self.threshold {
            warn!(
                node_id = %job.node_id,
                window = window.len(),
                threshold = self.threshold,
                "Stale trigger, round no longer full"
            );
            return Ok(None);
        }

        let digest = self.summarizer.summarize(&window).await?;
        // Shape contract holds for any summarizer, not just the HTTP client
        ensure_valid_digest(&digest)?;

        if job.node_type == NodeType::Topic {
            if let Some(topic) = self.storage.get_topic(&job.node_id).await? {
                if topic.status == TopicStatus::Completed {
                    info!(node_id = %job.node_id, "Topic already completed, standing down");
                    return Ok(None);
                }
            }
        }

        let parent_id = match job.node_type {
            NodeType::Topic => None,
            NodeType::Summary => Some(job.node_id.clone()),
        };
        let summary = Summary::new(job.root_topic_id.clone(), parent_id, digest);
        self.storage.save_summary(&summary).await?;

        if job.node_type == NodeType::Topic {
            // The saved summary is the durable outcome; a lost or failed
            // status transition must not turn this run into a failure.
            match self
                .storage
                .compare_and_set_topic_status(
                    &job.node_id,
                    TopicStatus::Locked,
                    TopicStatus::Completed,
                )
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    // First writer wins; this run's summary stands regardless
                    warn!(node_id = %job.node_id, "Completion race lost, status left as is");
                }
                Err(e) => {
                    warn!(
                        node_id = %job.node_id,
                        error = %e,
                        "Completion status update failed, summary kept"
                    );
                }
            }
        }

        info!(
            node_id = %job.node_id,
            summary_id = %summary.id,
            round = completed_rounds + 1,
            "Round distilled"
        );
        Ok(Some(summary.id))
    }

    /// Roll a locked topic back to active so it keeps accepting comments.
    async fn reopen(&self, job: &DistillationJob) {
        if job.node_type != NodeType::Topic {
            return;
        }
        match self
            .storage
            .compare_and_set_topic_status(&job.node_id, TopicStatus::Locked, TopicStatus::Active)
            .await
        {
            Ok(true) => info!(node_id = %job.node_id, "Topic reopened"),
            Ok(false) => {}
            Err(e) => error!(node_id = %job.node_id, error = %e, "Topic reopen failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockSummarizer;
    use crate::engine::cache::InMemoryCache;
    use crate::engine::lock::InMemoryLock;
    use crate::engine::notify::testing::RecordingNotifier;
    use crate::error::AiError;
    use crate::storage::{Comment, Disagreement, SqliteStorage, SummaryMetadata, Topic};
    use std::sync::Mutex;

    const THRESHOLD: i64 = 3;

    #[derive(Default)]
    struct RecordingScheduler {
        retries: Mutex<Vec<DistillationJob>>,
    }

    impl RecordingScheduler {
        fn jobs(&self) -> Vec<DistillationJob> {
            self.retries.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RetryScheduler for RecordingScheduler {
        async fn schedule_retry(&self, job: DistillationJob, _delay: Duration) {
            self.retries.lock().unwrap().push(job);
        }
    }

    fn digest() -> SummaryMetadata {
        SummaryMetadata {
            consensus: "Broad agreement on funding transit first".to_string(),
            disagreements: vec![Disagreement {
                point: "timeline".to_string(),
                views: vec!["now".to_string(), "after transit exists".to_string()],
            }],
            new_questions: vec!["Who pays?".to_string()],
            model: Some("moonshot-v1-8k".to_string()),
            timestamp: None,
            confidence_score: Some(0.8),
        }
    }

    struct Fixture {
        storage: Arc<SqliteStorage>,
        lock: Arc<InMemoryLock>,
        notifier: Arc<RecordingNotifier>,
        scheduler: Arc<RecordingScheduler>,
        worker: DistillationWorker,
    }

    async fn fixture(summarizer: MockSummarizer) -> Fixture {
        let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let lock = Arc::new(InMemoryLock::new(600));
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let worker = DistillationWorker::new(
            storage.clone(),
            Arc::new(summarizer),
            lock.clone(),
            notifier.clone(),
            scheduler.clone(),
            Arc::new(InMemoryCache::new()),
            THRESHOLD,
            300,
        );
        Fixture {
            storage,
            lock,
            notifier,
            scheduler,
            worker,
        }
    }

    /// Seed a topic with `count` comments, then reserve it the way intake
    /// does: lock first, then status to locked.
    async fn locked_topic(f: &Fixture, count: i64) -> (Topic, String) {
        let topic = Topic::new("Should cities ban private cars?");
        f.storage.create_topic(&topic).await.unwrap();
        for i in 0..count {
            let comment = Comment::new(format!("point {}", i), &topic.id, NodeType::Topic, None);
            f.storage.insert_comment_and_count(&comment).await.unwrap();
        }
        let lock_id = f
            .lock
            .try_acquire(&topic.id, NodeType::Topic)
            .await
            .unwrap();
        assert!(f
            .storage
            .compare_and_set_topic_status(&topic.id, TopicStatus::Active, TopicStatus::Locked)
            .await
            .unwrap());
        (topic, lock_id)
    }

    #[tokio::test]
    async fn test_successful_run_completes_topic() {
        let mut summarizer = MockSummarizer::new();
        summarizer
            .expect_summarize()
            .times(1)
            .returning(|_| Ok(digest()));
        let f = fixture(summarizer).await;
        let (topic, lock_id) = locked_topic(&f, THRESHOLD).await;

        f.worker
            .run(DistillationJob::triggered(
                &topic.id,
                NodeType::Topic,
                &topic.id,
                lock_id,
            ))
            .await;

        let summaries = f.storage.top_level_summaries(&topic.id).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].content, digest().consensus);

        let topic = f.storage.get_topic(&topic.id).await.unwrap().unwrap();
        assert_eq!(topic.status, TopicStatus::Completed);
        assert!(!f.lock.is_locked(&topic.id, NodeType::Topic).await);
        assert!(f.scheduler.jobs().is_empty());
        assert!(f
            .notifier
            .events()
            .iter()
            .any(|e| matches!(e, LoopEvent::LoopCompleted { .. })));
    }

    #[tokio::test]
    async fn test_failed_run_reopens_and_schedules_retry() {
        let mut summarizer = MockSummarizer::new();
        summarizer.expect_summarize().times(1).returning(|_| {
            Err(AiError::Unavailable {
                message: "upstream down".to_string(),
                retries: 3,
            })
        });
        let f = fixture(summarizer).await;
        let (topic, lock_id) = locked_topic(&f, THRESHOLD).await;

        f.worker
            .run(DistillationJob::triggered(
                &topic.id,
                NodeType::Topic,
                &topic.id,
                lock_id,
            ))
            .await;

        assert!(f
            .storage
            .top_level_summaries(&topic.id)
            .await
            .unwrap()
            .is_empty());
        let topic = f.storage.get_topic(&topic.id).await.unwrap().unwrap();
        assert_eq!(topic.status, TopicStatus::Active);
        assert!(!f.lock.is_locked(&topic.id, NodeType::Topic).await);

        let retries = f.scheduler.jobs();
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].attempt, 2);
        assert!(retries[0].lock_id.is_none(), "Retry must re-acquire its lock");
        assert!(f
            .notifier
            .events()
            .iter()
            .any(|e| matches!(e, LoopEvent::DistillationFailed { attempt: 1, .. })));
    }

    #[tokio::test]
    async fn test_stale_trigger_reopens_without_summarizing() {
        // No expectation set: any summarize call would panic
        let summarizer = MockSummarizer::new();
        let f = fixture(summarizer).await;
        let (topic, lock_id) = locked_topic(&f, THRESHOLD - 1).await;

        f.worker
            .run(DistillationJob::triggered(
                &topic.id,
                NodeType::Topic,
                &topic.id,
                lock_id,
            ))
            .await;

        let topic = f.storage.get_topic(&topic.id).await.unwrap().unwrap();
        assert_eq!(topic.status, TopicStatus::Active);
        assert!(!f.lock.is_locked(&topic.id, NodeType::Topic).await);
        assert!(f.scheduler.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_completion_keeps_single_summary() {
        let mut summarizer = MockSummarizer::new();
        summarizer
            .expect_summarize()
            .times(1)
            .returning(|_| Ok(digest()));
        let f = fixture(summarizer).await;
        let (topic, lock_id) = locked_topic(&f, THRESHOLD).await;

        let job = DistillationJob::triggered(&topic.id, NodeType::Topic, &topic.id, lock_id);
        let retry = job.retry_of();
        f.worker.run(job).await;

        // A delayed retry for the same round re-arms and stands down at the
        // status transition
        f.worker.run(retry).await;

        // A stale run still carrying a lock id finds the round already closed
        f.worker
            .run(DistillationJob::triggered(
                &topic.id,
                NodeType::Topic,
                &topic.id,
                "stale".to_string(),
            ))
            .await;

        let summaries = f.storage.top_level_summaries(&topic.id).await.unwrap();
        assert_eq!(summaries.len(), 1, "Duplicate runs must not add summaries");
        let loaded = f.storage.get_topic(&topic.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TopicStatus::Completed, "Terminal state holds");
        assert!(f.scheduler.jobs().is_empty());
        assert_eq!(
            f.notifier
                .events()
                .iter()
                .filter(|e| matches!(e, LoopEvent::LoopCompleted { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_retry_job_stands_down_when_node_busy() {
        let summarizer = MockSummarizer::new();
        let f = fixture(summarizer).await;
        let (topic, _lock_id) = locked_topic(&f, THRESHOLD).await;

        // Lock still held by the original trigger; the retry must not run
        let retry =
            DistillationJob::triggered(&topic.id, NodeType::Topic, &topic.id, "x".to_string())
                .retry_of();
        f.worker.run(retry).await;

        assert!(f
            .storage
            .top_level_summaries(&topic.id)
            .await
            .unwrap()
            .is_empty());
        let topic = f.storage.get_topic(&topic.id).await.unwrap().unwrap();
        assert_eq!(topic.status, TopicStatus::Locked);
    }
}
