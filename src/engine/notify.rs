use async_trait::async_trait;
use tracing::{info, warn};

use crate::storage::NodeType;

/// Lifecycle events emitted by the loop engine.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    /// A comment was accepted into a round.
    CommentAccepted {
        node_id: String,
        node_type: NodeType,
        comment_id: String,
        round_count: i64,
    },
    /// A round filled and distillation was triggered.
    DistillationTriggered {
        node_id: String,
        node_type: NodeType,
    },
    /// A round was distilled into a summary.
    LoopCompleted {
        node_id: String,
        node_type: NodeType,
        summary_id: String,
    },
    /// Distillation failed and the node was reopened.
    DistillationFailed {
        node_id: String,
        node_type: NodeType,
        error: String,
        attempt: u32,
    },
}

/// Fan-out point for loop lifecycle events.
///
/// Delivery is best-effort and must never affect loop state; the engine
/// fires and forgets.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one event.
    async fn notify(&self, event: LoopEvent);
}

/// Notifier that writes events to the structured log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: LoopEvent) {
        match event {
            LoopEvent::CommentAccepted {
                node_id,
                node_type,
                comment_id,
                round_count,
            } => {
                info!(node_id, %node_type, comment_id, round_count, "Comment accepted");
            }
            LoopEvent::DistillationTriggered { node_id, node_type } => {
                info!(node_id, %node_type, "Distillation triggered");
            }
            LoopEvent::LoopCompleted {
                node_id,
                node_type,
                summary_id,
            } => {
                info!(node_id, %node_type, summary_id, "Loop completed");
            }
            LoopEvent::DistillationFailed {
                node_id,
                node_type,
                error,
                attempt,
            } => {
                warn!(node_id, %node_type, error, attempt, "Distillation failed, node reopened");
            }
        }
    }
}
