//! String-keyed mutual exclusion
//!
//! Every path that mutates the check status of a merge request holds the
//! lock for that request's key. The [`GlobalLock`] trait hides whether the
//! lock table is process-local or shared between instances.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Held ownership of a lock key. Released when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    /// Create a guard that runs `release` exactly once
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A guard with nothing to release
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Release the lock now
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Lock table keyed by string
#[async_trait]
pub trait GlobalLock: Send + Sync {
    /// Wait for exclusive ownership of `key`.
    ///
    /// Fails with [`Error::Cancelled`] if `cancel` fires first.
    async fn lock(&self, key: &str, cancel: &CancellationToken) -> Result<LockGuard>;

    /// Take ownership of `key` if nobody holds it.
    ///
    /// `Ok(None)` means the key is busy, which is not an error.
    fn try_lock(&self, key: &str) -> Result<Option<LockGuard>>;
}

/// Run `f` while holding `key`, unless the key is already held.
///
/// Returns whether `f` ran. A busy lock means the work is already in flight,
/// so it yields `Ok(false)` rather than an error.
pub async fn try_lock_and_do<F, Fut>(lock: &dyn GlobalLock, key: &str, f: F) -> Result<bool>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    let Some(guard) = lock.try_lock(key)? else {
        trace!(key, "lock busy, skipping");
        return Ok(false);
    };
    let result = f().await;
    guard.release();
    result.map(|()| true)
}

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Process-local lock table
///
/// Each key maps to an async mutex. Entries are dropped from the table once
/// nobody holds or waits for them, so the key space may be unbounded.
#[derive(Default)]
pub struct MemoryLock {
    table: Arc<LockTable>,
}

impl MemoryLock {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held or waited on
    pub fn active_keys(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(table.entry(key.to_string()).or_default())
    }

    fn guard_for(&self, key: &str, held: tokio::sync::OwnedMutexGuard<()>) -> LockGuard {
        let table = Arc::clone(&self.table);
        let key = key.to_string();
        LockGuard::new(move || {
            drop(held);
            prune(&table, &key);
        })
    }
}

/// Remove `key` if the table holds the only reference to its mutex.
fn prune(table: &LockTable, key: &str) {
    let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
    if table.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
        table.remove(key);
    }
}

#[async_trait]
impl GlobalLock for MemoryLock {
    async fn lock(&self, key: &str, cancel: &CancellationToken) -> Result<LockGuard> {
        let mutex = self.entry(key);
        let acquired = tokio::select! {
            held = mutex.lock_owned() => Some(held),
            () = cancel.cancelled() => None,
        };
        let Some(held) = acquired else {
            prune(&self.table, key);
            return Err(Error::Cancelled);
        };
        trace!(key, "lock acquired");
        Ok(self.guard_for(key, held))
    }

    fn try_lock(&self, key: &str) -> Result<Option<LockGuard>> {
        let mutex = self.entry(key);
        let held = mutex.try_lock_owned().ok();
        Ok(held.map(|held| self.guard_for(key, held)))
    }
}

/// Lock that always succeeds immediately
///
/// For single-task setups where duplicate suppression relies on the queue
/// alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLock;

#[async_trait]
impl GlobalLock for NoopLock {
    async fn lock(&self, _key: &str, cancel: &CancellationToken) -> Result<LockGuard> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(LockGuard::noop())
    }

    fn try_lock(&self, _key: &str) -> Result<Option<LockGuard>> {
        Ok(Some(LockGuard::noop()))
    }
}
