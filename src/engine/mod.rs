//! The wisdom loop engine.
//!
//! Components, each behind its own seam:
//! - [`CommentIntake`]: validated writes and trigger decisions
//! - [`LoopStatusEvaluator`]: round arithmetic (pure read)
//! - [`DistillationLock`]: exclusive, TTL-bounded round reservation
//! - [`DistillationWorker`] + queue: background summarization with
//!   rollback and delayed retry
//! - [`WisdomTreeAggregator`]: recursive read-model assembly
//! - [`Notifier`] / [`TreeCache`]: pluggable side channels

mod cache;
mod intake;
mod lock;
mod loop_status;
mod notify;
mod queue;
mod tree;
mod worker;

pub use cache::{tree_cache_key, InMemoryCache, TreeCache};
pub use intake::{CommentIntake, NewComment, NewTopic, SubmitOutcome, MAX_COMMENT_CHARS, MAX_TITLE_CHARS};
pub use lock::{DistillationLock, InMemoryLock};
pub use loop_status::{LoopStatus, LoopStatusEvaluator};
pub use notify::{LogNotifier, LoopEvent, Notifier};
pub use queue::{distillation_queue, spawn_dispatcher, DistillationJob, QueueHandle, RetryScheduler};
pub use tree::{TreeStats, WisdomTreeAggregator, WisdomTreeNode};
pub use worker::DistillationWorker;
