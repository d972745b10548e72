use std::env;
use std::path::PathBuf;

use crate::error::EngineError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Summarization API settings.
    pub ai: AiConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// HTTP request settings.
    pub request: RequestConfig,
    /// Loop engine settings.
    pub engine: EngineConfig,
}

/// Summarization API configuration (OpenAI-compatible chat completions)
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Bearer token for the API.
    pub api_key: String,
    /// API base URL.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite database file path.
    pub path: PathBuf,
    /// Connection pool size.
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter level (trace, debug, info, warn, error).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable output.
    Pretty,
    /// Structured JSON output.
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retry budget for transient failures.
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub retry_delay_ms: u64,
}

/// Wisdom loop engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Comments per round; a full round triggers distillation.
    pub comment_threshold: i64,
    /// Lifetime of a distillation lock before it is treated as absent.
    pub lock_ttl_secs: u64,
    /// Delay before a failed distillation is retried.
    pub retry_delay_secs: u64,
    /// Recursion cap for wisdom tree reads.
    pub max_tree_depth: usize,
    /// TTL for cached tree aggregates.
    pub tree_cache_ttl_secs: u64,
    /// Capacity of the distillation job queue.
    pub queue_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, EngineError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let ai = AiConfig {
            api_key: env::var("AI_API_KEY").map_err(|_| EngineError::Config {
                message: "AI_API_KEY is required".to_string(),
            })?,
            base_url: env::var("AI_BASE_URL")
                .unwrap_or_else(|_| "https://api.moonshot.cn".to_string()),
            model: env::var("AI_MODEL").unwrap_or_else(|_| "moonshot-v1-8k".to_string()),
            max_tokens: env::var("AI_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2000),
            temperature: env::var("AI_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.5),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/parliament.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30000),
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            retry_delay_ms: env::var("RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        };

        let engine = EngineConfig {
            comment_threshold: env::var("COMMENT_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            lock_ttl_secs: env::var("LOCK_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(600),
            retry_delay_secs: env::var("DISTILLATION_RETRY_DELAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            max_tree_depth: env::var("MAX_TREE_DEPTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50),
            tree_cache_ttl_secs: env::var("TREE_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1800),
            queue_capacity: env::var("QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(64),
        };

        if engine.comment_threshold < 1 {
            return Err(EngineError::Config {
                message: "COMMENT_THRESHOLD must be >= 1".to_string(),
            });
        }

        Ok(Config {
            ai,
            database,
            logging,
            request,
            engine,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            comment_threshold: 10,
            lock_ttl_secs: 600,
            retry_delay_secs: 300,
            max_tree_depth: 50,
            tree_cache_ttl_secs: 1800,
            queue_capacity: 64,
        }
    }
}
