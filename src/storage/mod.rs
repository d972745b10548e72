//! Storage layer for discussion persistence.
//!
//! This module provides SQLite-based storage for topics, comments, and
//! AI-distilled summaries, plus the atomic primitives the loop engine
//! relies on: insert-and-count within one transaction, and compare-and-set
//! status transitions.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// Lifecycle status of a topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    /// Accepting comments.
    #[default]
    Active,
    /// A full round is being distilled; comments are rejected.
    Locked,
    /// Distillation succeeded; the discussion continues on the summary.
    Completed,
}

impl std::fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicStatus::Active => write!(f, "active"),
            TopicStatus::Locked => write!(f, "locked"),
            TopicStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for TopicStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(TopicStatus::Active),
            "locked" => Ok(TopicStatus::Locked),
            "completed" => Ok(TopicStatus::Completed),
            _ => Err(format!("Unknown topic status: {}", s)),
        }
    }
}

/// Kind of node a comment can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// The root of a discussion tree.
    Topic,
    /// A distilled summary node.
    Summary,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Topic => write!(f, "topic"),
            NodeType::Summary => write!(f, "summary"),
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "topic" => Ok(NodeType::Topic),
            "summary" => Ok(NodeType::Summary),
            _ => Err(format!("Unknown node type: {}", s)),
        }
    }
}

/// Root of a discussion tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    /// Unique topic identifier.
    pub id: String,
    /// Discussion title.
    pub title: String,
    /// Lifecycle status.
    pub status: TopicStatus,
    /// When the topic was created.
    pub created_at: DateTime<Utc>,
}

impl Topic {
    /// Create a new active topic.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            status: TopicStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// Whether the topic currently accepts comments.
    pub fn accepts_comments(&self) -> bool {
        self.status == TopicStatus::Active
    }
}

/// A single discussion contribution, immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    /// Unique comment identifier.
    pub id: String,
    /// Comment text (1-2000 chars after trimming).
    pub content: String,
    /// Optional author handle.
    pub author: Option<String>,
    /// Parent node identifier.
    pub parent_id: String,
    /// Whether the parent is a topic or a summary.
    pub parent_type: NodeType,
    /// When the comment was created.
    pub created_at: DateTime<Utc>,
    /// Commit-order sequence assigned by storage (0 until persisted).
    #[serde(default)]
    pub seq: i64,
}

impl Comment {
    /// Create a new comment ready for insertion.
    pub fn new(
        content: impl Into<String>,
        parent_id: impl Into<String>,
        parent_type: NodeType,
        author: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            author,
            parent_id: parent_id.into(),
            parent_type,
            created_at: Utc::now(),
            seq: 0,
        }
    }
}

/// A point of disagreement extracted from one round of comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    /// The contested point.
    pub point: String,
    /// The distinct positions taken on it.
    pub views: Vec<String>,
}

/// Structured digest produced by the summarizer for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryMetadata {
    /// What the round broadly agreed on.
    pub consensus: String,
    /// Points where the round split.
    pub disagreements: Vec<Disagreement>,
    /// Questions worth carrying into the next round.
    pub new_questions: Vec<String>,
    /// Model that produced the digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// When the digest was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Model-reported confidence (0.0-1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
}

/// Distillation result closing one full round of comments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    /// Unique summary identifier.
    pub id: String,
    /// Human-readable consensus text.
    pub content: String,
    /// Root topic of the tree this summary belongs to.
    pub topic_id: String,
    /// Set when this summary was distilled from comments under another summary.
    pub parent_id: Option<String>,
    /// Full structured digest with provenance.
    pub metadata: SummaryMetadata,
    /// When the summary was created.
    pub created_at: DateTime<Utc>,
}

impl Summary {
    /// Create a new summary from a validated digest.
    pub fn new(
        topic_id: impl Into<String>,
        parent_id: Option<String>,
        metadata: SummaryMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: metadata.consensus.clone(),
            topic_id: topic_id.into(),
            parent_id,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Whether this summary hangs directly off the topic.
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Persistence contract for the loop engine.
///
/// Implementations must provide commit-order counting for comments and
/// compare-and-set semantics for topic status; the engine builds its
/// concurrency guarantees on those two primitives.
#[async_trait]
pub trait Storage: Send + Sync {
    // Topic operations

    /// Persist a new topic.
    async fn create_topic(&self, topic: &Topic) -> StorageResult<()>;
    /// Get a topic by ID.
    async fn get_topic(&self, id: &str) -> StorageResult<Option<Topic>>;
    /// List topics, newest first.
    async fn list_topics(&self, limit: i64) -> StorageResult<Vec<Topic>>;
    /// Atomically transition a topic's status. Returns false if the topic
    /// was not in the expected status (or does not exist).
    async fn compare_and_set_topic_status(
        &self,
        id: &str,
        expected: TopicStatus,
        next: TopicStatus,
    ) -> StorageResult<bool>;

    // Comment operations

    /// Insert a comment and return the total comment count under its parent,
    /// both inside one transaction: the count reflects exactly the comments
    /// committed up to and including this one.
    async fn insert_comment_and_count(&self, comment: &Comment) -> StorageResult<i64>;
    /// Get a comment by ID.
    async fn get_comment(&self, id: &str) -> StorageResult<Option<Comment>>;
    /// All comments under a parent, commit order ascending.
    async fn comments_by_parent(
        &self,
        parent_id: &str,
        parent_type: NodeType,
    ) -> StorageResult<Vec<Comment>>;
    /// A stable distillation window: `limit` comments under the parent
    /// starting at `offset`, commit order ascending.
    async fn get_round_window(
        &self,
        parent_id: &str,
        parent_type: NodeType,
        offset: i64,
        limit: i64,
    ) -> StorageResult<Vec<Comment>>;
    /// Total comment count under a parent.
    async fn count_comments(&self, parent_id: &str, parent_type: NodeType) -> StorageResult<i64>;

    // Summary operations

    /// Persist a new summary.
    async fn save_summary(&self, summary: &Summary) -> StorageResult<()>;
    /// Get a summary by ID.
    async fn get_summary(&self, id: &str) -> StorageResult<Option<Summary>>;
    /// Summaries distilled from comments under the given summary.
    async fn summaries_by_parent(&self, parent_id: &str) -> StorageResult<Vec<Summary>>;
    /// Summaries hanging directly off a topic (no parent summary).
    async fn top_level_summaries(&self, topic_id: &str) -> StorageResult<Vec<Summary>>;
    /// Number of summaries closing rounds under the given parent node.
    async fn count_summaries_for_parent(
        &self,
        parent_id: &str,
        parent_type: NodeType,
    ) -> StorageResult<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_topic_status_round_trip() {
        for status in [
            TopicStatus::Active,
            TopicStatus::Locked,
            TopicStatus::Completed,
        ] {
            let parsed = TopicStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(parsed, status);
        }
        assert!(TopicStatus::from_str("archived").is_err());
    }

    #[test]
    fn test_node_type_round_trip() {
        assert_eq!(NodeType::from_str("topic").unwrap(), NodeType::Topic);
        assert_eq!(NodeType::from_str("SUMMARY").unwrap(), NodeType::Summary);
        assert!(NodeType::from_str("comment").is_err());
    }

    #[test]
    fn test_new_topic_is_active() {
        let topic = Topic::new("Should cities ban cars?");
        assert_eq!(topic.status, TopicStatus::Active);
        assert!(topic.accepts_comments());
        assert!(!topic.id.is_empty());
    }

    #[test]
    fn test_summary_content_mirrors_consensus() {
        let metadata = SummaryMetadata {
            consensus: "Most agree transit needs funding first".to_string(),
            disagreements: vec![Disagreement {
                point: "timeline".to_string(),
                views: vec!["now".to_string(), "after transit exists".to_string()],
            }],
            new_questions: vec!["Who pays?".to_string()],
            model: Some("moonshot-v1-8k".to_string()),
            timestamp: None,
            confidence_score: Some(0.8),
        };

        let summary = Summary::new("topic-1", None, metadata);
        assert_eq!(summary.content, "Most agree transit needs funding first");
        assert!(summary.is_top_level());

        let nested = Summary::new(
            "topic-1",
            Some(summary.id.clone()),
            summary.metadata.clone(),
        );
        assert!(!nested.is_top_level());
    }

    #[test]
    fn test_comment_construction() {
        let comment = Comment::new("First point", "topic-1", NodeType::Topic, None);
        assert_eq!(comment.parent_type, NodeType::Topic);
        assert_eq!(comment.seq, 0);
        assert!(comment.author.is_none());
    }
}
