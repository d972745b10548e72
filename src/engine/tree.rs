use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::storage::{Comment, NodeType, Storage, Summary, SummaryMetadata, TopicStatus};

use super::cache::{tree_cache_key, TreeCache};

/// One node of the aggregated wisdom tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WisdomTreeNode {
    /// Node identifier (topic or summary id).
    pub id: String,
    /// Node kind.
    pub node_type: NodeType,
    /// Topic title or summary consensus text.
    pub content: String,
    /// Structured digest, present on summary nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SummaryMetadata>,
    /// Comments attached directly to this node, commit order.
    pub comments: Vec<Comment>,
    /// One child per summary distilled from this node's comments.
    pub children: Vec<WisdomTreeNode>,
    /// Set when the depth cap cut this node's children.
    #[serde(default)]
    pub truncated: bool,
}

/// Aggregate counts over a built tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    /// Comments across all nodes.
    pub total_comments: usize,
    /// Summary nodes in the tree.
    pub total_summaries: usize,
    /// Deepest summary nesting level (topic root is depth 0).
    pub max_depth: usize,
    /// Topic lifecycle status.
    pub topic_status: TopicStatus,
}

/// Read-side assembler of the full discussion tree for a topic.
///
/// Pure read: never mutates state. Results are cached with a short TTL and
/// invalidated by intake on every accepted comment, so staleness is bounded
/// by the TTL even if an invalidation is missed.
pub struct WisdomTreeAggregator {
    storage: Arc<dyn Storage>,
    cache: Arc<dyn TreeCache>,
    max_depth: usize,
    cache_ttl_secs: u64,
}

impl WisdomTreeAggregator {
    /// Create an aggregator with the given depth cap and cache TTL.
    pub fn new(
        storage: Arc<dyn Storage>,
        cache: Arc<dyn TreeCache>,
        max_depth: usize,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            storage,
            cache,
            max_depth,
            cache_ttl_secs,
        }
    }

    /// Build (or fetch cached) the full tree rooted at a topic.
    pub async fn get_tree(&self, topic_id: &str) -> EngineResult<WisdomTreeNode> {
        let key = tree_cache_key(topic_id);
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(tree) = serde_json::from_value::<WisdomTreeNode>(cached) {
                debug!(topic_id, "Tree served from cache");
                return Ok(tree);
            }
            // Unreadable cache entry, rebuild
            warn!(topic_id, "Dropping undecodable cached tree");
        }

        let topic = self
            .storage
            .get_topic(topic_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "topic",
                id: topic_id.to_string(),
            })?;

        let comments = self
            .storage
            .comments_by_parent(topic_id, NodeType::Topic)
            .await?;

        let mut children = Vec::new();
        let mut truncated = false;
        if self.max_depth == 0 {
            truncated = true;
        } else {
            for summary in self.storage.top_level_summaries(topic_id).await? {
                children.push(self.build_summary_node(summary, 1).await?);
            }
        }

        let tree = WisdomTreeNode {
            id: topic.id,
            node_type: NodeType::Topic,
            content: topic.title,
            metadata: None,
            comments,
            children,
            truncated,
        };

        if let Ok(value) = serde_json::to_value(&tree) {
            self.cache.set(&key, value, self.cache_ttl_secs).await;
        }
        Ok(tree)
    }

    /// Aggregate counts for a topic's tree.
    pub async fn tree_stats(&self, topic_id: &str) -> EngineResult<TreeStats> {
        let topic = self
            .storage
            .get_topic(topic_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "topic",
                id: topic_id.to_string(),
            })?;

        let tree = self.get_tree(topic_id).await?;
        let mut stats = TreeStats {
            total_comments: 0,
            total_summaries: 0,
            max_depth: 0,
            topic_status: topic.status,
        };
        accumulate(&tree, 0, &mut stats);
        Ok(stats)
    }

    /// Recursive node builder. Boxed future because async recursion has no
    /// static size.
    fn build_summary_node(
        &self,
        summary: Summary,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = EngineResult<WisdomTreeNode>> + Send + '_>> {
        Box::pin(async move {
            let comments = self
                .storage
                .comments_by_parent(&summary.id, NodeType::Summary)
                .await?;

            let mut children = Vec::new();
            let mut truncated = false;
            if depth >= self.max_depth {
                // Children beyond the cap are dropped, not an error
                truncated = true;
            } else {
                for child in self.storage.summaries_by_parent(&summary.id).await? {
                    children.push(self.build_summary_node(child, depth + 1).await?);
                }
            }

            Ok(WisdomTreeNode {
                id: summary.id,
                node_type: NodeType::Summary,
                content: summary.content,
                metadata: Some(summary.metadata),
                comments,
                children,
                truncated,
            })
        })
    }
}

fn accumulate(node: &WisdomTreeNode, depth: usize, stats: &mut TreeStats) {
    stats.total_comments += node.comments.len();
    if node.node_type == NodeType::Summary {
        stats.total_summaries += 1;
    }
    stats.max_depth = stats.max_depth.max(depth);
    for child in &node.children {
        accumulate(child, depth + 1, stats);
    }
}
