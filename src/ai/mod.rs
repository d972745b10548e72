//! Summarization capability client.
//!
//! This module provides:
//! - The [`Summarizer`] trait the distillation worker depends on
//! - [`MoonshotClient`], an OpenAI-compatible chat-completions client
//! - Strict validation of the structured digest returned by the model

mod client;
mod types;

pub use client::MoonshotClient;
pub use types::{ensure_valid_digest, parse_digest, ChatRequest, ChatResponse, Message};

use async_trait::async_trait;

use crate::error::AiResult;
use crate::storage::{Comment, SummaryMetadata};

/// External text-summarization capability.
///
/// Given one full round of comments, produces a structured digest
/// (consensus, disagreements, new questions). Implementations may fail
/// transiently; the worker owns rollback and retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Distill a round of comments into a validated digest.
    async fn summarize(&self, comments: &[Comment]) -> AiResult<SummaryMetadata>;
}
