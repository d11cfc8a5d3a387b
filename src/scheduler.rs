//! Check triggers and the queue worker
//!
//! Every trigger marks the request `Checking` through a conditional update
//! and pushes its id onto the [`UniqueQueue`]. The [`CheckWorker`] drains
//! the queue, taking the request's lock before running the background check.

use crate::check::{MergeabilityChecker, lock_key};
use crate::config::{Config, PullRequestConfig, QueueConfig};
use crate::error::{Error, Result};
use crate::lock::{GlobalLock, try_lock_and_do};
use crate::queue::{PushOutcome, QueueHandler, UniqueQueue};
use crate::services::Collaborators;
use crate::types::{Column, MergeRequest, MergeRequestId, MergeStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Entry points that schedule background checks
pub struct CheckScheduler {
    checker: Arc<MergeabilityChecker>,
    lock: Arc<dyn GlobalLock>,
    queue: Arc<UniqueQueue>,
    policy: PullRequestConfig,
    queue_config: QueueConfig,
}

impl CheckScheduler {
    /// Wire a scheduler to its services, lock table and queue
    pub fn new(
        config: &Config,
        services: Collaborators,
        lock: Arc<dyn GlobalLock>,
        queue: Arc<UniqueQueue>,
    ) -> Self {
        let checker = Arc::new(MergeabilityChecker::new(services, config.pull_request.clone()));
        Self {
            checker,
            lock,
            queue,
            policy: config.pull_request.clone(),
            queue_config: config.queue.clone(),
        }
    }

    /// The check queue
    pub fn queue(&self) -> &Arc<UniqueQueue> {
        &self.queue
    }

    /// The checker run by the worker
    pub fn checker(&self) -> &Arc<MergeabilityChecker> {
        &self.checker
    }

    /// Set the request to `Checking` unless it is already merged.
    ///
    /// The stored record is read back after the conditional update, so a
    /// merge that landed after the caller loaded `request` wins. Returns
    /// `false` if the request must not be queued.
    async fn mark_as_checking(&self, request: &MergeRequest) -> Result<bool> {
        if request.has_merged {
            debug!(request = %request, "already merged, not scheduling a check");
            return Ok(false);
        }

        let store = &self.checker.services().store;
        let mut checking = request.clone();
        checking.status = MergeStatus::Checking;
        store
            .update_columns_if_not_merged(&checking, &[Column::Status])
            .await?;

        let stored = store.get_by_id(request.id).await?;
        if stored.status != MergeStatus::Checking {
            debug!(
                request = %request,
                status = %stored.status,
                "status changed concurrently, not scheduling a check"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn push(&self, request: &MergeRequest) -> Result<()> {
        match self.queue.push(&request.queue_token())? {
            PushOutcome::Queued => debug!(request = %request, "check queued"),
            PushOutcome::AlreadyQueued => debug!(request = %request, "check already queued"),
        }
        Ok(())
    }

    /// Mark `request` as checking and queue a check right away.
    pub async fn start_immediately(&self, request: &MergeRequest) -> Result<()> {
        if self.mark_as_checking(request).await? {
            self.push(request)?;
        }
        Ok(())
    }

    /// Mark `request` as checking, queuing a check only if it saw recent
    /// activity.
    ///
    /// Requests idle for longer than the configured delay stay in
    /// `Checking` until a view or update queues the check.
    pub async fn start_delayable(&self, request: &MergeRequest) -> Result<()> {
        if !self.mark_as_checking(request).await? {
            return Ok(());
        }

        if self.policy.is_inactive(request.issue.updated_at, Utc::now()) {
            debug!(
                request = %request,
                updated_at = %request.issue.updated_at,
                "inactive, deferring check until viewed"
            );
            return Ok(());
        }

        self.push(request)
    }

    /// Queue a deferred check when a `Checking` request is viewed.
    ///
    /// Does nothing if another task holds the request's lock, since that
    /// task is already handling it.
    pub async fn start_on_view(&self, request: &MergeRequest) -> Result<()> {
        if request.status != MergeStatus::Checking {
            return Ok(());
        }

        let ran = try_lock_and_do(self.lock.as_ref(), &lock_key(request.id), move || async move {
            self.push(request)
        })
        .await?;

        if !ran {
            debug!(request = %request, "check already in progress");
        }
        Ok(())
    }

    /// Recheck every unmerged request targeting `branch` of `repo_id`.
    ///
    /// Failures for one request are logged and do not stop the others.
    /// Returns the number of requests scheduled.
    pub async fn check_base_branch(&self, repo_id: i64, branch: &str) -> Result<usize> {
        let requests = self
            .checker
            .services()
            .store
            .list_unmerged_by_base(repo_id, branch)
            .await?;

        let mut scheduled = 0;
        for request in &requests {
            match self.start_immediately(request).await {
                Ok(()) => scheduled += 1,
                Err(e) => error!(request = %request, error = %e, "failed to schedule check"),
            }
        }

        info!(repo_id, branch, scheduled, "base branch updated, checks scheduled");
        Ok(scheduled)
    }

    /// Re-queue requests left in `Checking` by a previous run.
    ///
    /// Skipped when the inactivity delay is enabled: deferred requests
    /// legitimately sit in `Checking`. Stops early if `cancel` fires.
    pub async fn recover_on_startup(&self, cancel: &CancellationToken) -> Result<usize> {
        if self.policy.inactive_delay().is_some() {
            debug!("inactivity delay enabled, skipping check recovery");
            return Ok(0);
        }

        let ids = self
            .checker
            .services()
            .store
            .list_ids_by_status(MergeStatus::Checking)
            .await?;

        let mut recovered = 0;
        for id in ids {
            if cancel.is_cancelled() {
                warn!(recovered, "check recovery interrupted");
                break;
            }
            if let Err(e) = self.queue.push(&id.to_string()) {
                error!(id, error = %e, "failed to re-queue check");
                continue;
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "re-queued interrupted checks");
        }
        Ok(recovered)
    }

    /// The queue handler backing this scheduler
    pub fn worker(&self) -> CheckWorker {
        CheckWorker {
            checker: Arc::clone(&self.checker),
            lock: Arc::clone(&self.lock),
            queue: Arc::clone(&self.queue),
        }
    }

    /// Consume the check queue until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let worker = Arc::new(self.worker());
        self.queue
            .run(
                worker,
                self.queue_config.workers,
                self.queue_config.batch_length,
                cancel,
            )
            .await;
    }
}

impl std::fmt::Debug for CheckScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckScheduler")
            .field("queue", &self.queue)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Runs one background check per queued token
pub struct CheckWorker {
    checker: Arc<MergeabilityChecker>,
    lock: Arc<dyn GlobalLock>,
    queue: Arc<UniqueQueue>,
}

#[async_trait]
impl QueueHandler for CheckWorker {
    async fn handle(&self, token: &str, cancel: &CancellationToken) -> Result<()> {
        let id: MergeRequestId = token
            .parse()
            .map_err(|e| Error::Queue(format!("invalid check token {token:?}: {e}")))?;

        let guard = self.lock.lock(&lock_key(id), cancel).await?;
        let result = self.checker.refresh_status(id, &self.queue, cancel).await;
        guard.release();
        result
    }
}
