//! Named locks serializing mutations of a shared parent resource
//!
//! Sub-resources that live inside one parent (NAT pools, probes, rules of a
//! load balancer) can only be changed by rewriting the whole parent. Every
//! reconciler acquires the lock keyed by the parent's identifier before its
//! read-modify-write cycle, so sibling edits never lose each other's updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Information about a held lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique identifier for this acquisition
    pub id: String,
    /// The key being held (a parent resource identifier)
    pub key: String,
    /// The operation being performed (e.g., "create_or_update", "delete")
    pub operation: String,
    /// Who acquired the lock (username@hostname)
    pub who: String,
    /// When the lock was acquired
    pub acquired: DateTime<Utc>,
}

impl LockInfo {
    fn new(key: &str, operation: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.to_string(),
            operation: operation.to_string(),
            who: get_lock_owner(),
            acquired: Utc::now(),
        }
    }
}

/// Registry of per-key locks
///
/// Cloning shares the underlying registry.
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    held: Arc<DashMap<String, LockInfo>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no one else holds `key`, then hold it until the guard is dropped.
    pub async fn acquire(&self, key: &str, operation: &str) -> LockGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        log::debug!("Waiting for lock on {:?} ({})", key, operation);
        let guard = mutex.lock_owned().await;

        let info = LockInfo::new(key, operation);
        self.held.insert(key.to_string(), info.clone());
        log::debug!("Acquired lock {} on {:?} ({})", info.id, key, operation);

        LockGuard {
            info,
            locks: Arc::clone(&self.locks),
            held: Arc::clone(&self.held),
            _guard: guard,
        }
    }

    /// Whether `key` is currently held
    pub fn is_held(&self, key: &str) -> bool {
        self.held.contains_key(key)
    }

    /// Keys currently held, sorted
    pub fn held_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.held.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

/// A held lock; released when dropped
#[derive(Debug)]
pub struct LockGuard {
    info: LockInfo,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    held: Arc<DashMap<String, LockInfo>>,
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard {
    pub fn info(&self) -> &LockInfo {
        &self.info
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Only forget the record if it is still ours; the mutex is released after this runs.
        self.held
            .remove_if(&self.info.key, |_, current| current.id == self.info.id);
        // One reference lives in the map and one in our guard; any more are waiters.
        self.locks
            .remove_if(&self.info.key, |_, mutex| Arc::strong_count(mutex) <= 2);
        log::debug!("Released lock {} on {:?}", self.info.id, self.info.key);
    }
}

/// Get the lock owner string (username@hostname)
fn get_lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}
