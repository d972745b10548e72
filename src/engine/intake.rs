use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::{EngineError, EngineResult};
use crate::storage::{Comment, NodeType, Storage, Topic, TopicStatus};

use super::cache::{tree_cache_key, TreeCache};
use super::lock::DistillationLock;
use super::loop_status::{LoopStatus, LoopStatusEvaluator};
use super::notify::{LoopEvent, Notifier};
use super::queue::{DistillationJob, QueueHandle};

/// Maximum comment length in characters, after trimming.
pub const MAX_COMMENT_CHARS: usize = 2000;

/// Maximum topic title length in characters, after trimming.
pub const MAX_TITLE_CHARS: usize = 255;

/// Incoming comment submission.
#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    /// Comment text.
    pub content: String,
    /// Node the comment attaches to.
    pub parent_id: String,
    /// Whether the parent is a topic or a summary.
    pub parent_type: NodeType,
    /// Optional author handle.
    #[serde(default)]
    pub author: Option<String>,
}

/// Incoming topic creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTopic {
    /// Discussion title.
    pub title: String,
}

/// Result of an accepted submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The persisted comment.
    pub comment: Comment,
    /// Whether this submission triggered a distillation run.
    pub triggered: bool,
    /// Round status as of this submission.
    pub loop_status: LoopStatus,
}

/// Front door for discussion writes.
///
/// Validates, persists, and decides whether a round just filled. The
/// threshold check is advisory; the distillation lock arbitrates which of
/// several racing threshold submissions actually launches the worker, so
/// at most one does.
pub struct CommentIntake {
    storage: Arc<dyn Storage>,
    lock: Arc<dyn DistillationLock>,
    evaluator: Arc<LoopStatusEvaluator>,
    queue: QueueHandle,
    notifier: Arc<dyn Notifier>,
    cache: Arc<dyn TreeCache>,
}

impl CommentIntake {
    /// Wire the intake engine to its collaborators.
    pub fn new(
        storage: Arc<dyn Storage>,
        lock: Arc<dyn DistillationLock>,
        evaluator: Arc<LoopStatusEvaluator>,
        queue: QueueHandle,
        notifier: Arc<dyn Notifier>,
        cache: Arc<dyn TreeCache>,
    ) -> Self {
        Self {
            storage,
            lock,
            evaluator,
            queue,
            notifier,
            cache,
        }
    }

    /// Create a new topic.
    pub async fn create_topic(&self, request: NewTopic) -> EngineResult<Topic> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(EngineError::Validation {
                field: "title".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(EngineError::Validation {
                field: "title".to_string(),
                reason: format!("must be at most {} characters", MAX_TITLE_CHARS),
            });
        }

        let topic = Topic::new(title);
        self.storage.create_topic(&topic).await?;
        info!(topic_id = %topic.id, "Topic created");
        Ok(topic)
    }

    /// List topics, newest first.
    pub async fn list_topics(&self, limit: i64) -> EngineResult<Vec<Topic>> {
        Ok(self.storage.list_topics(limit).await?)
    }

    /// Submit a comment. Returns immediately even when the submission fills
    /// a round; the distillation runs in the background.
    pub async fn submit(&self, request: NewComment) -> EngineResult<SubmitOutcome> {
        let content = validate_content(&request.content)?;
        let root_topic_id = self
            .resolve_parent(&request.parent_id, request.parent_type)
            .await?;

        let comment = Comment::new(
            content,
            request.parent_id.clone(),
            request.parent_type,
            request.author,
        );
        let total = self.storage.insert_comment_and_count(&comment).await?;

        let loop_status = self
            .evaluator
            .status_with_total(&request.parent_id, request.parent_type, total)
            .await?;

        let triggered = if loop_status.is_ready {
            self.try_trigger(&request.parent_id, request.parent_type, &root_topic_id)
                .await
        } else {
            false
        };

        self.cache
            .invalidate_prefix(&tree_cache_key(&root_topic_id))
            .await;
        self.notifier
            .notify(LoopEvent::CommentAccepted {
                node_id: request.parent_id.clone(),
                node_type: request.parent_type,
                comment_id: comment.id.clone(),
                round_count: loop_status.comment_count,
            })
            .await;

        if triggered {
            self.notifier
                .notify(LoopEvent::DistillationTriggered {
                    node_id: request.parent_id,
                    node_type: request.parent_type,
                })
                .await;
        }

        Ok(SubmitOutcome {
            comment,
            triggered,
            loop_status,
        })
    }

    /// Check the parent exists and accepts comments; returns the root topic
    /// id of the tree the parent belongs to.
    async fn resolve_parent(
        &self,
        parent_id: &str,
        parent_type: NodeType,
    ) -> EngineResult<String> {
        match parent_type {
            NodeType::Topic => {
                let topic = self
                    .storage
                    .get_topic(parent_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound {
                        kind: "topic",
                        id: parent_id.to_string(),
                    })?;

                if !topic.accepts_comments() {
                    return Err(EngineError::TopicLocked {
                        id: parent_id.to_string(),
                    });
                }
                Ok(topic.id)
            }
            NodeType::Summary => {
                let summary = self
                    .storage
                    .get_summary(parent_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound {
                        kind: "summary",
                        id: parent_id.to_string(),
                    })?;
                Ok(summary.topic_id)
            }
        }
    }

    /// Attempt to launch distillation for a full round. Every failure mode
    /// here is benign, including a failing status store: the comment already
    /// committed, so nothing may propagate; only `triggered` reports false.
    async fn try_trigger(&self, node_id: &str, node_type: NodeType, root_topic_id: &str) -> bool {
        let lock_id = match self.lock.try_acquire(node_id, node_type).await {
            Some(lock_id) => lock_id,
            None => {
                debug!(node_id, "Round already being distilled");
                return false;
            }
        };

        if node_type == NodeType::Topic {
            let locked = match self
                .storage
                .compare_and_set_topic_status(node_id, TopicStatus::Active, TopicStatus::Locked)
                .await
            {
                Ok(locked) => locked,
                Err(e) => {
                    error!(node_id, error = %e, "Status store failed, trigger abandoned");
                    self.lock.release(node_id, node_type, &lock_id).await;
                    return false;
                }
            };
            if !locked {
                debug!(node_id, "Topic no longer active, trigger abandoned");
                self.lock.release(node_id, node_type, &lock_id).await;
                return false;
            }
        }

        let job = DistillationJob::triggered(node_id, node_type, root_topic_id, lock_id.clone());
        if !self.queue.enqueue(job) {
            // Queue saturated: undo the reservation so the next full-round
            // submission can try again.
            if node_type == NodeType::Topic {
                if let Err(e) = self
                    .storage
                    .compare_and_set_topic_status(node_id, TopicStatus::Locked, TopicStatus::Active)
                    .await
                {
                    error!(node_id, error = %e, "Status rollback failed after rejected job");
                }
            }
            self.lock.release(node_id, node_type, &lock_id).await;
            return false;
        }

        true
    }
}

/// Validate and normalize comment content.
fn validate_content(raw: &str) -> EngineResult<String> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(EngineError::Validation {
            field: "content".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(EngineError::Validation {
            field: "content".to_string(),
            reason: format!("must be at most {} characters", MAX_COMMENT_CHARS),
        });
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_trimmed_and_accepted() {
        assert_eq!(validate_content("  hello  ").unwrap(), "hello");
    }

    #[test]
    fn test_empty_content_rejected() {
        assert!(validate_content("").is_err());
        assert!(validate_content("   \n\t ").is_err());
    }

    #[test]
    fn test_content_boundary() {
        let exactly = "x".repeat(MAX_COMMENT_CHARS);
        assert!(validate_content(&exactly).is_ok());

        let over = "x".repeat(MAX_COMMENT_CHARS + 1);
        let err = validate_content(&over).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[test]
    fn test_content_length_counts_chars_not_bytes() {
        // Multibyte characters within the limit
        let content = "雨".repeat(MAX_COMMENT_CHARS);
        assert!(validate_content(&content).is_ok());
        let over = "雨".repeat(MAX_COMMENT_CHARS + 1);
        assert!(validate_content(&over).is_err());
    }
}
