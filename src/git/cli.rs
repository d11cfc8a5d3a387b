//! `VersionControl` over the git command line

use crate::config::GitConfig;
use crate::error::{Error, Result};
use crate::git::{Ancestry, CommitInfo, MergeTestOutcome, Signature, VersionControl};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Git service running the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::from_config(&GitConfig::default())
    }
}

impl GitCli {
    /// Create a git service using `binary` with a per-command timeout
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Create a git service from configuration
    pub fn from_config(config: &GitConfig) -> Self {
        Self::new(&config.binary, Duration::from_secs(config.timeout_secs))
    }

    /// Run git in `repo`. The child is killed if cancelled or timed out.
    async fn run(&self, repo: &Path, args: &[&str], cancel: &CancellationToken) -> Result<Output> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .current_dir(repo)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(repo = %repo.display(), command = %describe(args), "running git");

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.timeout, command.output()) => match result {
                Ok(output) => output
                    .map_err(|e| Error::Git(format!("failed to run {}: {e}", describe(args)))),
                Err(_) => Err(Error::Git(format!(
                    "{} timed out after {}s",
                    describe(args),
                    self.timeout.as_secs()
                ))),
            },
        }
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    async fn run_ok(&self, repo: &Path, args: &[&str], cancel: &CancellationToken) -> Result<String> {
        let output = self.run(repo, args, cancel).await?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn describe(args: &[&str]) -> String {
    format!("git {}", args.join(" "))
}

fn command_failed(args: &[&str], output: &Output) -> Error {
    let code = output
        .status
        .code()
        .map_or_else(|| "signal".to_string(), |c| c.to_string());
    Error::Git(format!(
        "{} exited with {code}: {}",
        describe(args),
        String::from_utf8_lossy(&output.stderr).trim()
    ))
}

/// Reject revisions that git would parse as options.
fn check_rev(rev: &str) -> Result<&str> {
    if rev.is_empty() || rev.starts_with('-') {
        return Err(Error::Git(format!("invalid revision {rev:?}")));
    }
    Ok(rev)
}

fn lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Parse `%H%x00%an%x00%ae%x00%aI` output.
fn parse_commit_info(raw: &str) -> Result<CommitInfo> {
    let mut fields = raw.trim_end().splitn(4, '\0');
    let (Some(id), Some(name), Some(email), Some(when)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(Error::Git(format!("unexpected commit format: {raw:?}")));
    };

    let when = DateTime::parse_from_rfc3339(when)
        .map_err(|e| Error::Git(format!("invalid author date {when:?}: {e}")))?
        .with_timezone(&Utc);

    Ok(CommitInfo {
        id: id.to_string(),
        author: Signature {
            name: name.to_string(),
            email: email.to_string(),
            when,
        },
    })
}

#[async_trait]
impl VersionControl for GitCli {
    async fn is_ancestor(
        &self,
        repo: &Path,
        commit: &str,
        of: &str,
        cancel: &CancellationToken,
    ) -> Result<Ancestry> {
        let args = ["merge-base", "--is-ancestor", check_rev(commit)?, check_rev(of)?];
        let output = self.run(repo, &args, cancel).await?;
        match output.status.code() {
            Some(0) => Ok(Ancestry::Ancestor),
            Some(1) => Ok(Ancestry::NotAncestor),
            _ => Err(command_failed(&args, &output)),
        }
    }

    async fn full_commit_id(
        &self,
        repo: &Path,
        rev: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let rev_commit = format!("{}^{{commit}}", check_rev(rev)?);
        self.run_ok(repo, &["rev-parse", "--verify", rev_commit.as_str()], cancel)
            .await
    }

    async fn first_merge_on_ancestry_path(
        &self,
        repo: &Path,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let range = format!("{}..{}", check_rev(from)?, check_rev(to)?);
        let stdout = self
            .run_ok(
                repo,
                &["rev-list", "--ancestry-path", "--merges", "--reverse", range.as_str()],
                cancel,
            )
            .await?;
        Ok(stdout.lines().next().map(|l| l.trim().to_string()))
    }

    async fn commit_info(
        &self,
        repo: &Path,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<CommitInfo> {
        let stdout = self
            .run_ok(
                repo,
                &["show", "-s", "--format=%H%x00%an%x00%ae%x00%aI", check_rev(id)?],
                cancel,
            )
            .await?;
        parse_commit_info(&stdout)
    }

    async fn test_merge(
        &self,
        repo: &Path,
        base: &str,
        head: &str,
        cancel: &CancellationToken,
    ) -> Result<MergeTestOutcome> {
        let (base, head) = (check_rev(base)?, check_rev(head)?);

        let merge_base = self
            .run_ok(repo, &["merge-base", base, head], cancel)
            .await?;

        let args = [
            "merge-tree",
            "--write-tree",
            "--name-only",
            "--no-messages",
            base,
            head,
        ];
        let output = self.run(repo, &args, cancel).await?;
        let conflicted_files = match output.status.code() {
            Some(0) => Vec::new(),
            // First line is the tree id, the rest are conflicted paths
            Some(1) => lines(&String::from_utf8_lossy(&output.stdout))
                .into_iter()
                .skip(1)
                .collect(),
            _ => return Err(command_failed(&args, &output)),
        };

        let changed = self
            .run_ok(repo, &["diff", "--name-only", merge_base.as_str(), head], cancel)
            .await?;

        let behind_range = format!("{head}..{base}");
        let behind = self
            .run_ok(repo, &["rev-list", "--count", behind_range.as_str()], cancel)
            .await?;
        let commits_behind = behind
            .parse()
            .map_err(|e| Error::Git(format!("unexpected rev-list count {behind:?}: {e}")))?;

        Ok(MergeTestOutcome {
            merge_base,
            conflicted_files,
            changed_files: lines(&changed),
            commits_behind,
        })
    }
}
