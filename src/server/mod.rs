//! RPC server for the wisdom loop engine.
//!
//! This module provides:
//! - A JSON-RPC 2.0 server over stdio
//! - Request handlers and error-code mapping
//! - Shared application state wiring

mod rpc;

pub use rpc::*;

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::ai::Summarizer;
use crate::config::Config;
use crate::engine::{
    distillation_queue, spawn_dispatcher, CommentIntake, DistillationLock, DistillationWorker,
    InMemoryCache, InMemoryLock, LogNotifier, LoopStatusEvaluator, Notifier, TreeCache,
    WisdomTreeAggregator,
};
use crate::storage::Storage;

/// Application state shared across handlers.
///
/// Owns the engine components; the RPC layer only parses params, calls
/// into these, and maps errors.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Comment intake engine (writes and trigger decisions).
    pub intake: Arc<CommentIntake>,
    /// Round status evaluator (reads).
    pub evaluator: Arc<LoopStatusEvaluator>,
    /// Tree aggregator (reads).
    pub aggregator: Arc<WisdomTreeAggregator>,
}

impl AppState {
    /// Wire up the full engine around a storage backend and a summarizer.
    ///
    /// Returns the state plus the dispatcher task draining the distillation
    /// queue; the caller holds the handle for the lifetime of the server.
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        summarizer: Arc<dyn Summarizer>,
    ) -> (Self, JoinHandle<()>) {
        let lock: Arc<dyn DistillationLock> = Arc::new(InMemoryLock::new(config.engine.lock_ttl_secs));
        let cache: Arc<dyn TreeCache> = Arc::new(InMemoryCache::new());
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

        let evaluator = Arc::new(LoopStatusEvaluator::new(
            Arc::clone(&storage),
            config.engine.comment_threshold,
        ));

        // Channel first: the worker needs the handle for retries, the
        // dispatcher needs the worker.
        let (queue, receiver) = distillation_queue(config.engine.queue_capacity);

        let worker = Arc::new(DistillationWorker::new(
            Arc::clone(&storage),
            summarizer,
            Arc::clone(&lock),
            Arc::clone(&notifier),
            Arc::new(queue.clone()),
            Arc::clone(&cache),
            config.engine.comment_threshold,
            config.engine.retry_delay_secs,
        ));
        let dispatcher = spawn_dispatcher(receiver, worker);

        let intake = Arc::new(CommentIntake::new(
            Arc::clone(&storage),
            Arc::clone(&lock),
            Arc::clone(&evaluator),
            queue,
            Arc::clone(&notifier),
            Arc::clone(&cache),
        ));

        let aggregator = Arc::new(WisdomTreeAggregator::new(
            storage,
            cache,
            config.engine.max_tree_depth,
            config.engine.tree_cache_ttl_secs,
        ));

        (
            Self {
                config,
                intake,
                evaluator,
                aggregator,
            },
            dispatcher,
        )
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AiConfig, DatabaseConfig, EngineConfig, LogFormat, LoggingConfig, RequestConfig,
    };
    use crate::storage::SqliteStorage;
    use std::path::PathBuf;

    fn create_test_config() -> Config {
        Config {
            ai: AiConfig {
                api_key: "test-key".to_string(),
                base_url: "https://api.moonshot.cn".to_string(),
                model: "moonshot-v1-8k".to_string(),
                max_tokens: 2000,
                temperature: 0.5,
            },
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            request: RequestConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_app_state_wiring() {
        let config = create_test_config();
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let summarizer = crate::ai::MoonshotClient::new(&config.ai, config.request.clone()).unwrap();

        let (state, dispatcher) =
            AppState::new(config, Arc::new(storage), Arc::new(summarizer));

        assert_eq!(state.evaluator.threshold(), 10);

        let shared: SharedState = Arc::new(state);
        let shared2 = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(shared2);

        dispatcher.abort();
    }
}
