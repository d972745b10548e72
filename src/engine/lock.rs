use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::storage::NodeType;

/// Exclusive, per-node, time-bounded lock guarding distillation launches.
///
/// The lock is a logical reservation, not a database transaction: it is
/// held across the summarization call without pinning any connection.
/// Expired entries are treated as absent, so a crashed worker can never
/// deadlock a node permanently.
#[async_trait]
pub trait DistillationLock: Send + Sync {
    /// Try to acquire the lock for a node. Returns the lock id on success,
    /// `None` if another unexpired holder exists.
    async fn try_acquire(&self, node_id: &str, node_type: NodeType) -> Option<String>;

    /// Release a held lock. Idempotent: releasing an already-released,
    /// expired, or differently-owned lock is a no-op, never an error.
    async fn release(&self, node_id: &str, node_type: NodeType, lock_id: &str);

    /// Whether an unexpired lock currently exists for the node.
    async fn is_locked(&self, node_id: &str, node_type: NodeType) -> bool;

    /// Drop expired entries. Advisory cleanup only; `try_acquire` already
    /// treats expired entries as free.
    async fn sweep_expired(&self) -> usize;
}

struct LockEntry {
    lock_id: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// In-memory lock implementation keyed by `(node_type, node_id)`.
///
/// A durable backend (row-level lease in the store, or an external
/// coordination service) can replace this behind the same trait.
pub struct InMemoryLock {
    locks: Mutex<HashMap<(NodeType, String), LockEntry>>,
    ttl: Duration,
}

impl InMemoryLock {
    /// Create a lock registry with the given entry lifetime.
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Acquisition time of the current holder, if any (for diagnostics).
    pub async fn acquired_at(&self, node_id: &str, node_type: NodeType) -> Option<DateTime<Utc>> {
        let locks = self.locks.lock().await;
        locks
            .get(&(node_type, node_id.to_string()))
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.acquired_at)
    }
}

#[async_trait]
impl DistillationLock for InMemoryLock {
    async fn try_acquire(&self, node_id: &str, node_type: NodeType) -> Option<String> {
        let key = (node_type, node_id.to_string());
        let now = Utc::now();
        let mut locks = self.locks.lock().await;

        if let Some(existing) = locks.get(&key) {
            if existing.expires_at > now {
                debug!(node_id, %node_type, "Lock already held");
                return None;
            }
        }

        let lock_id = Uuid::new_v4().to_string();
        locks.insert(
            key,
            LockEntry {
                lock_id: lock_id.clone(),
                acquired_at: now,
                expires_at: now + self.ttl,
            },
        );

        debug!(node_id, %node_type, lock_id, "Lock acquired");
        Some(lock_id)
    }

    async fn release(&self, node_id: &str, node_type: NodeType, lock_id: &str) {
        let key = (node_type, node_id.to_string());
        let mut locks = self.locks.lock().await;

        // Matched by lock id so a stale worker cannot release a newer
        // holder's lock.
        if locks
            .get(&key)
            .map(|entry| entry.lock_id == lock_id)
            .unwrap_or(false)
        {
            locks.remove(&key);
            debug!(node_id, %node_type, lock_id, "Lock released");
        }
    }

    async fn is_locked(&self, node_id: &str, node_type: NodeType) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(&(node_type, node_id.to_string()))
            .map(|entry| entry.expires_at > Utc::now())
            .unwrap_or(false)
    }

    async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, entry| entry.expires_at > now);
        before - locks.len()
    }
}
