use async_trait::async_trait;
use chrono::DateTime;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::{Comment, NodeType, Storage, Summary, SummaryMetadata, Topic, TopicStatus};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory instance for tests. Pool size is pinned to one
    /// connection so all queries see the same database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_topic(&self, topic: &Topic) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO topics (id, title, status, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&topic.id)
        .bind(&topic.title)
        .bind(topic.status.to_string())
        .bind(topic.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_topic(&self, id: &str) -> StorageResult<Option<Topic>> {
        let row: Option<TopicRow> = sqlx::query_as(
            r#"
            SELECT id, title, status, created_at
            FROM topics
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list_topics(&self, limit: i64) -> StorageResult<Vec<Topic>> {
        let rows: Vec<TopicRow> = sqlx::query_as(
            r#"
            SELECT id, title, status, created_at
            FROM topics
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn compare_and_set_topic_status(
        &self,
        id: &str,
        expected: TopicStatus,
        next: TopicStatus,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE topics
            SET status = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(next.to_string())
        .bind(id)
        .bind(expected.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_comment_and_count(&self, comment: &Comment) -> StorageResult<i64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO comments (id, content, author, parent_id, parent_type, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&comment.id)
        .bind(&comment.content)
        .bind(&comment.author)
        .bind(&comment.parent_id)
        .bind(comment.parent_type.to_string())
        .bind(comment.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM comments
            WHERE parent_id = ? AND parent_type = ?
            "#,
        )
        .bind(&comment.parent_id)
        .bind(comment.parent_type.to_string())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(count)
    }

    async fn get_comment(&self, id: &str) -> StorageResult<Option<Comment>> {
        let row: Option<CommentRow> = sqlx::query_as(
            r#"
            SELECT seq, id, content, author, parent_id, parent_type, created_at
            FROM comments
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn comments_by_parent(
        &self,
        parent_id: &str,
        parent_type: NodeType,
    ) -> StorageResult<Vec<Comment>> {
        let rows: Vec<CommentRow> = sqlx::query_as(
            r#"
            SELECT seq, id, content, author, parent_id, parent_type, created_at
            FROM comments
            WHERE parent_id = ? AND parent_type = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(parent_id)
        .bind(parent_type.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn get_round_window(
        &self,
        parent_id: &str,
        parent_type: NodeType,
        offset: i64,
        limit: i64,
    ) -> StorageResult<Vec<Comment>> {
        let rows: Vec<CommentRow> = sqlx::query_as(
            r#"
            SELECT seq, id, content, author, parent_id, parent_type, created_at
            FROM comments
            WHERE parent_id = ? AND parent_type = ?
            ORDER BY seq ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(parent_id)
        .bind(parent_type.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn count_comments(&self, parent_id: &str, parent_type: NodeType) -> StorageResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM comments
            WHERE parent_id = ? AND parent_type = ?
            "#,
        )
        .bind(parent_id)
        .bind(parent_type.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn save_summary(&self, summary: &Summary) -> StorageResult<()> {
        let metadata =
            serde_json::to_string(&summary.metadata).map_err(|e| StorageError::Query {
                message: format!("Failed to serialize summary metadata: {}", e),
            })?;

        sqlx::query(
            r#"
            INSERT INTO summaries (id, content, topic_id, parent_id, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&summary.id)
        .bind(&summary.content)
        .bind(&summary.topic_id)
        .bind(&summary.parent_id)
        .bind(&metadata)
        .bind(summary.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_summary(&self, id: &str) -> StorageResult<Option<Summary>> {
        let row: Option<SummaryRow> = sqlx::query_as(
            r#"
            SELECT id, content, topic_id, parent_id, metadata, created_at
            FROM summaries
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn summaries_by_parent(&self, parent_id: &str) -> StorageResult<Vec<Summary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            r#"
            SELECT id, content, topic_id, parent_id, metadata, created_at
            FROM summaries
            WHERE parent_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn top_level_summaries(&self, topic_id: &str) -> StorageResult<Vec<Summary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            r#"
            SELECT id, content, topic_id, parent_id, metadata, created_at
            FROM summaries
            WHERE topic_id = ? AND parent_id IS NULL
            ORDER BY created_at ASC
            "#,
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn count_summaries_for_parent(
        &self,
        parent_id: &str,
        parent_type: NodeType,
    ) -> StorageResult<i64> {
        let (count,): (i64,) = match parent_type {
            NodeType::Topic => {
                sqlx::query_as(
                    r#"
                    SELECT COUNT(*)
                    FROM summaries
                    WHERE topic_id = ? AND parent_id IS NULL
                    "#,
                )
                .bind(parent_id)
                .fetch_one(&self.pool)
                .await?
            }
            NodeType::Summary => {
                sqlx::query_as(
                    r#"
                    SELECT COUNT(*)
                    FROM summaries
                    WHERE parent_id = ?
                    "#,
                )
                .bind(parent_id)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(count)
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct TopicRow {
    id: String,
    title: String,
    status: String,
    created_at: String,
}

impl From<TopicRow> for Topic {
    fn from(row: TopicRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            status: row.status.parse().unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    seq: i64,
    id: String,
    content: String,
    author: Option<String>,
    parent_id: String,
    parent_type: String,
    created_at: String,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            content: row.content,
            author: row.author,
            parent_id: row.parent_id,
            parent_type: row.parent_type.parse().unwrap_or(NodeType::Topic),
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
            seq: row.seq,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: String,
    content: String,
    topic_id: String,
    parent_id: Option<String>,
    metadata: String,
    created_at: String,
}

impl From<SummaryRow> for Summary {
    fn from(row: SummaryRow) -> Self {
        let metadata: SummaryMetadata =
            serde_json::from_str(&row.metadata).unwrap_or(SummaryMetadata {
                consensus: row.content.clone(),
                disagreements: Vec::new(),
                new_questions: Vec::new(),
                model: None,
                timestamp: None,
                confidence_score: None,
            });

        Self {
            id: row.id,
            content: row.content,
            topic_id: row.topic_id,
            parent_id: row.parent_id,
            metadata,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
        }
    }
}
