use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::storage::{NodeType, Storage};

/// Read-model for the current round under one node.
///
/// A round holds up to `threshold` comments. Completed rounds are the ones
/// already closed by a persisted summary; only comments beyond those count
/// toward the current round, so a surplus comment arriving while the
/// previous round is still distilling does not look like a fresh full round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStatus {
    /// Node the round belongs to.
    pub node_id: String,
    /// Whether the node is a topic or a summary.
    pub node_type: NodeType,
    /// Rounds already closed by a summary.
    pub completed_rounds: i64,
    /// Comments in the current (open) round.
    pub comment_count: i64,
    /// Comments per round.
    pub threshold: i64,
    /// Comments still needed to fill the round.
    pub remaining_slots: i64,
    /// Fill percentage of the current round, 0-100.
    pub progress: u8,
    /// Whether the round is full and eligible for distillation.
    pub is_ready: bool,
}

impl LoopStatus {
    fn from_counts(
        node_id: String,
        node_type: NodeType,
        total_comments: i64,
        completed_rounds: i64,
        threshold: i64,
    ) -> Self {
        let comment_count = (total_comments - completed_rounds * threshold).max(0);
        let remaining_slots = (threshold - comment_count).max(0);
        let progress = ((comment_count.min(threshold) * 100) / threshold) as u8;

        Self {
            node_id,
            node_type,
            completed_rounds,
            comment_count,
            threshold,
            remaining_slots,
            progress,
            is_ready: comment_count >= threshold,
        }
    }
}

/// Pure read-side evaluator deciding whether a round is full.
///
/// Advisory only: the distillation lock, not this check, arbitrates which
/// submission actually launches a worker.
pub struct LoopStatusEvaluator {
    storage: Arc<dyn Storage>,
    threshold: i64,
}

impl LoopStatusEvaluator {
    /// Create an evaluator over the given storage and round size.
    pub fn new(storage: Arc<dyn Storage>, threshold: i64) -> Self {
        Self { storage, threshold }
    }

    /// Comments per round.
    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    /// Current round status for a node, from persisted counts.
    pub async fn status(&self, node_id: &str, node_type: NodeType) -> EngineResult<LoopStatus> {
        let total = self.storage.count_comments(node_id, node_type).await?;
        let completed_rounds = self
            .storage
            .count_summaries_for_parent(node_id, node_type)
            .await?;

        Ok(LoopStatus::from_counts(
            node_id.to_string(),
            node_type,
            total,
            completed_rounds,
            self.threshold,
        ))
    }

    /// Status derived from an already-known total count, used by intake right
    /// after its transactional insert so the decision matches that count.
    pub async fn status_with_total(
        &self,
        node_id: &str,
        node_type: NodeType,
        total_comments: i64,
    ) -> EngineResult<LoopStatus> {
        let completed_rounds = self
            .storage
            .count_summaries_for_parent(node_id, node_type)
            .await?;

        Ok(LoopStatus::from_counts(
            node_id.to_string(),
            node_type,
            total_comments,
            completed_rounds,
            self.threshold,
        ))
    }
}
