use thiserror::Error;

/// Engine-level errors surfaced to callers of the public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong with the configuration.
        message: String,
    },

    /// Rejected input (empty content, over-long title, ...).
    #[error("Validation failed: {field} - {reason}")]
    Validation {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A referenced topic, summary, or comment does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// The kind of entity ("topic", "summary", ...).
        kind: &'static str,
        /// The identifier that missed.
        id: String,
    },

    /// The topic is locked or completed and rejects new comments.
    #[error("Topic {id} is not accepting comments")]
    TopicLocked {
        /// The topic in question.
        id: String,
    },

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Summarization failure.
    #[error("Summarizer error: {0}")]
    Ai(#[from] AiError),

    /// Anything that should not happen.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not open or reach the database.
    #[error("Database connection failed: {message}")]
    Connection {
        /// Connection failure detail.
        message: String,
    },

    /// A statement failed outside of sqlx's own error type.
    #[error("Query failed: {message}")]
    Query {
        /// Query failure detail.
        message: String,
    },

    /// Embedded migrations failed to apply.
    #[error("Migration failed: {message}")]
    Migration {
        /// Migration failure detail.
        message: String,
    },

    /// Any other database error.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Summarization API errors
#[derive(Debug, Error)]
pub enum AiError {
    /// The retry budget was exhausted without a successful call.
    #[error("Summarizer unavailable: {message} (retries: {retries})")]
    Unavailable {
        /// The last error seen.
        message: String,
        /// Attempts made.
        retries: u32,
    },

    /// The API answered with a non-success status.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The model's output violated the digest contract.
    #[error("Malformed summarizer response: {message}")]
    MalformedResponse {
        /// What was malformed.
        message: String,
    },

    /// The request exceeded the configured timeout.
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout {
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AiError {
    /// Permanent errors are not worth retrying at the HTTP client level.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::MalformedResponse { .. } => false,
            AiError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => true,
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for summarizer operations
pub type AiResult<T> = Result<T, AiError>;
