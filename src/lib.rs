//! # Parliament Loop
//!
//! A discussion-distillation engine: clients submit comments against a
//! topic, and every time a round of comments fills up, the round is locked
//! and condensed by an LLM into a structured summary node. Summaries accept
//! further comments, recursively growing a "wisdom tree".
//!
//! ## Features
//!
//! - **Comment Intake**: validated writes with atomic threshold detection
//! - **Distillation Lock**: TTL-bounded exclusivity so each full round is
//!   distilled exactly once
//! - **Background Worker**: queued summarization with rollback and delayed
//!   retry on failure
//! - **Wisdom Tree**: recursive aggregation of topics, comments, and
//!   nested summaries
//!
//! ## Architecture
//!
//! ```text
//! RPC Client → JSON-RPC Server (stdio) → Loop Engine → Summarization API (HTTP)
//!                                             ↓
//!                                       SQLite (State)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use parliament_loop::{AppState, Config, RpcServer};
//! use parliament_loop::ai::MoonshotClient;
//! use parliament_loop::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let summarizer = MoonshotClient::new(&config.ai, config.request.clone())?;
//!     let (state, _dispatcher) =
//!         AppState::new(config, Arc::new(storage), Arc::new(summarizer));
//!     let server = RpcServer::new(Arc::new(state));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Summarization API client and digest validation.
pub mod ai;
/// Configuration management for the server.
pub mod config;
/// The wisdom loop engine: intake, lock, worker, tree.
pub mod engine;
/// Error types and result aliases for the application.
pub mod error;
/// System prompts for the distillation call.
pub mod prompts;
/// JSON-RPC server implementation and request handling.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use server::{AppState, RpcServer, SharedState};
