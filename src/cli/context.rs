//! Shared command context for CLI commands
//!
//! Extracts the setup shared by every command: configuration, state file,
//! git access, queue, lock table and scheduler.

use mergecheck::config::{Config, load_config};
use mergecheck::error::{Error, Result};
use mergecheck::git::GitCli;
use mergecheck::lock::MemoryLock;
use mergecheck::queue::UniqueQueue;
use mergecheck::scheduler::CheckScheduler;
use mergecheck::services::MergeRequestStore;
use mergecheck::state::{FileState, default_state_path};
use mergecheck::types::{MergeRequest, MergeRequestId};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shared context for CLI commands
pub struct CommandContext {
    /// Loaded configuration
    pub config: Config,
    /// State file serving all collaborators
    pub state: Arc<FileState>,
    /// Check scheduler
    pub scheduler: Arc<CheckScheduler>,
    /// Cancelled on Ctrl-C
    pub cancel: CancellationToken,
}

impl CommandContext {
    /// Create a new command context
    ///
    /// `state` defaults to `state.toml` in the user data directory. Only the
    /// long-running service passes `durable_queue`: one-shot commands drain
    /// their own checks before exiting and leave the queue file to it.
    pub fn new(
        config_path: Option<&Path>,
        state_path: Option<&Path>,
        durable_queue: bool,
    ) -> Result<Self> {
        let config = load_config(config_path)?;

        let state_path = match state_path {
            Some(path) => path.to_path_buf(),
            None => default_state_path().ok_or_else(|| {
                Error::Config("no data directory found, pass --state".to_string())
            })?,
        };
        let state = Arc::new(FileState::open(state_path)?);

        let git = Arc::new(GitCli::from_config(&config.git));
        let queue = if durable_queue {
            UniqueQueue::from_config(&config.queue)?
        } else {
            UniqueQueue::new(&config.queue.name)
        };
        let queue = Arc::new(queue);
        let scheduler = Arc::new(CheckScheduler::new(
            &config,
            state.collaborators(git),
            Arc::new(MemoryLock::new()),
            queue,
        ));

        Ok(Self {
            config,
            state,
            scheduler,
            cancel: CancellationToken::new(),
        })
    }

    /// Load a merge request
    pub async fn request(&self, id: MergeRequestId) -> Result<MergeRequest> {
        self.state.get_by_id(id).await
    }

    /// Run the queue consumer until every queued check has finished.
    pub async fn drain(&self) -> Result<()> {
        let stop = self.cancel.child_token();
        let scheduler = Arc::clone(&self.scheduler);
        let consumer = tokio::spawn({
            let stop = stop.clone();
            async move { scheduler.run(stop).await }
        });

        tokio::select! {
            () = self.scheduler.queue().wait_idle() => debug!("check queue drained"),
            () = self.cancel.cancelled() => debug!("interrupted while draining"),
        }
        stop.cancel();

        consumer
            .await
            .map_err(|e| Error::Internal(format!("queue consumer failed: {e}")))?;

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Cancel running work on Ctrl-C.
    pub fn cancel_on_ctrl_c(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }
}
