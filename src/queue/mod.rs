//! Deduplicating work queue
//!
//! Tokens are opaque strings (merge request ids). A token is accepted only
//! if it is not already pending; once dispatched it may be queued again,
//! which is how a fresh trigger supersedes a check that is already running.
//!
//! With a data directory the queue is durable: pending and in-flight tokens
//! survive a restart and are delivered again (at-least-once).

mod storage;

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Outcome of [`UniqueQueue::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The token was added
    Queued,
    /// The token was already pending; the pending entry will cover it
    AlreadyQueued,
}

/// Consumer of queued tokens
#[async_trait]
pub trait QueueHandler: Send + Sync + 'static {
    /// Process one token.
    ///
    /// Errors are logged by the queue and not retried. Returning
    /// [`Error::Cancelled`] leaves the token stored for redelivery.
    async fn handle(&self, token: &str, cancel: &CancellationToken) -> Result<()>;
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<String>,
    pending_set: HashSet<String>,
    /// Dispatched tokens whose handler has not returned yet
    in_flight: Vec<String>,
    /// Bumped on every change that must reach the durable file
    revision: u64,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Tokens to persist: in-flight first, then pending, without duplicates.
    fn durable_tokens(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.in_flight
            .iter()
            .chain(self.pending.iter())
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect()
    }
}

/// Deduplicating queue with a single consumer loop
pub struct UniqueQueue {
    name: String,
    state: Mutex<QueueState>,
    /// Wakes the consumer when a token arrives
    ready: Notify,
    /// Wakes `wait_idle` callers
    idle: Notify,
    /// Durable file, if any
    path: Option<PathBuf>,
    /// Revision last written to `path`. Serialises writers without holding
    /// `state` across file IO.
    written: Mutex<u64>,
}

/// Tokens to write, tagged with the queue revision they reflect
struct Snapshot {
    revision: u64,
    tokens: Vec<String>,
}

impl UniqueQueue {
    /// Create an in-memory queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            ready: Notify::new(),
            idle: Notify::new(),
            path: None,
            written: Mutex::new(0),
        }
    }

    /// Open a durable queue stored in `dir`, reloading tokens left over
    /// from a previous run.
    pub fn open(name: impl Into<String>, dir: &Path) -> Result<Self> {
        let mut queue = Self::new(name);
        let path = storage::queue_path(dir, &queue.name);
        let tokens = storage::load_tokens(&path)?;
        if !tokens.is_empty() {
            info!(queue = %queue.name, count = tokens.len(), "restored queued tokens");
        }

        let state = queue.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for token in tokens {
            if state.pending_set.insert(token.clone()) {
                state.pending.push_back(token);
            }
        }
        queue.path = Some(path);
        Ok(queue)
    }

    /// Create the queue described by `config`
    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        match &config.data_dir {
            Some(dir) => Self::open(&config.name, dir),
            None => Ok(Self::new(&config.name)),
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Capture the durable tokens. Call with the state lock held.
    fn snapshot(&self, state: &mut QueueState) -> Option<Snapshot> {
        self.path.as_ref()?;
        state.revision += 1;
        Some(Snapshot {
            revision: state.revision,
            tokens: state.durable_tokens(),
        })
    }

    /// Write `snapshot` unless a newer revision is already on disk.
    ///
    /// Call without the state lock held.
    fn persist(&self, snapshot: Option<Snapshot>) -> Result<()> {
        let (Some(path), Some(snapshot)) = (&self.path, snapshot) else {
            return Ok(());
        };
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if *written >= snapshot.revision {
            trace!(queue = %self.name, revision = snapshot.revision, "newer tokens already saved");
            return Ok(());
        }
        storage::save_tokens(path, &snapshot.tokens)?;
        *written = snapshot.revision;
        Ok(())
    }

    /// Add `token` unless it is already pending.
    pub fn push(&self, token: &str) -> Result<PushOutcome> {
        let mut state = self.state();
        if state.pending_set.contains(token) {
            trace!(queue = %self.name, token, "already queued");
            return Ok(PushOutcome::AlreadyQueued);
        }

        state.pending_set.insert(token.to_string());
        state.pending.push_back(token.to_string());
        let snapshot = self.snapshot(&mut state);
        drop(state);

        if let Err(e) = self.persist(snapshot) {
            let mut state = self.state();
            if state.pending_set.remove(token) {
                state.pending.retain(|t| t != token);
            }
            return Err(e);
        }

        trace!(queue = %self.name, token, "queued");
        self.ready.notify_one();
        Ok(PushOutcome::Queued)
    }

    /// Whether `token` is waiting to be dispatched
    pub fn has(&self, token: &str) -> bool {
        self.state().pending_set.contains(token)
    }

    /// Number of pending tokens
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    /// Whether no token is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether nothing is pending or being handled
    pub fn is_idle(&self) -> bool {
        self.state().is_idle()
    }

    /// Wait until nothing is pending or being handled.
    ///
    /// Only resolves while a consumer is running (or the queue is idle).
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Move up to `max` pending tokens to in-flight.
    fn pop_batch(&self, max: usize) -> Vec<String> {
        let mut state = self.state();
        let take = max.min(state.pending.len());
        let batch: Vec<String> = state.pending.drain(..take).collect();
        for token in &batch {
            state.pending_set.remove(token);
            state.in_flight.push(token.clone());
        }
        if batch.is_empty() {
            return batch;
        }
        let snapshot = self.snapshot(&mut state);
        drop(state);

        if let Err(e) = self.persist(snapshot) {
            warn!(queue = %self.name, error = %e, "failed to persist dispatched tokens");
        }
        batch
    }

    /// Mark one delivery of `token` as handled.
    fn complete(&self, token: &str) {
        let mut state = self.state();
        if let Some(pos) = state.in_flight.iter().position(|t| t == token) {
            state.in_flight.swap_remove(pos);
        }
        let snapshot = self.snapshot(&mut state);
        let idle = state.is_idle();
        drop(state);

        if let Err(e) = self.persist(snapshot) {
            warn!(queue = %self.name, error = %e, "failed to persist completed token");
        }

        if idle {
            self.idle.notify_waiters();
        }
    }

    async fn dispatch<H: QueueHandler>(
        &self,
        handler: &H,
        batch: Vec<String>,
        cancel: &CancellationToken,
    ) {
        for token in batch {
            if cancel.is_cancelled() {
                // Left in flight; the durable file still lists it
                break;
            }
            match handler.handle(&token, cancel).await {
                Ok(()) => self.complete(&token),
                Err(Error::Cancelled) => {
                    debug!(queue = %self.name, token, "handler cancelled");
                    break;
                }
                Err(e) => {
                    error!(queue = %self.name, token, error = %e, "queue handler failed");
                    self.complete(&token);
                }
            }
        }
    }

    /// Consume tokens until `cancel` fires.
    ///
    /// Runs at most `workers` batches of up to `batch_length` tokens at a
    /// time. On cancellation waits for in-flight batches to return.
    pub async fn run<H: QueueHandler>(
        self: &Arc<Self>,
        handler: Arc<H>,
        workers: usize,
        batch_length: usize,
        cancel: CancellationToken,
    ) {
        let workers = workers.max(1);
        let batch_length = batch_length.max(1);
        let mut batches = JoinSet::new();
        info!(queue = %self.name, workers, batch_length, "queue consumer started");

        loop {
            while batches.len() < workers {
                let batch = self.pop_batch(batch_length);
                if batch.is_empty() {
                    break;
                }
                let queue = Arc::clone(self);
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                batches.spawn(async move { queue.dispatch(handler.as_ref(), batch, &cancel).await });
            }

            tokio::select! {
                Some(joined) = batches.join_next(), if !batches.is_empty() => {
                    if let Err(e) = joined {
                        error!(queue = %self.name, error = %e, "queue batch panicked");
                    }
                }
                () = self.ready.notified() => {}
                () = cancel.cancelled() => break,
            }
        }

        while let Some(joined) = batches.join_next().await {
            if let Err(e) = joined {
                error!(queue = %self.name, error = %e, "queue batch panicked");
            }
        }
        info!(queue = %self.name, pending = self.len(), "queue consumer stopped");
    }
}

impl std::fmt::Debug for UniqueQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniqueQueue")
            .field("name", &self.name)
            .field("state", &*self.state())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
