//! Shared test utilities

#![allow(dead_code)]

pub mod mock_services;

pub use mock_services::*;

use chrono::{Duration, Utc};
use mergecheck::config::Config;
use mergecheck::types::{
    Issue, MergeRequest, MergeRequestId, MergeStatus, ObjectFormat, Repository, User,
};
use std::path::{Path, PathBuf};

pub const REPO_ID: i64 = 100;

pub fn make_user(id: i64, name: &str) -> User {
    User {
        id,
        name: name.to_string(),
        email: format!("{name}@example.com"),
    }
}

pub fn make_repo() -> Repository {
    Repository {
        id: REPO_ID,
        name: "widgets".to_string(),
        owner: make_user(1, "owner"),
        path: PathBuf::from("/srv/git/widgets.git"),
        object_format: ObjectFormat::Sha1,
        autodetect_manual_merge: true,
    }
}

/// An open request into `main`, last active an hour ago
pub fn make_request(id: MergeRequestId, status: MergeStatus) -> MergeRequest {
    let index = u64::try_from(id).unwrap_or_default();
    MergeRequest {
        id,
        index,
        issue: Issue {
            id: id * 10,
            title: format!("Change #{id}"),
            is_closed: false,
            updated_at: Utc::now() - Duration::hours(1),
        },
        base_repo: make_repo(),
        base_branch: "main".to_string(),
        head_branch: format!("feature-{id}"),
        head_ref: MergeRequest::default_head_ref(index),
        status,
        merge_base: None,
        conflicted_files: Vec::new(),
        changed_protected_files: Vec::new(),
        commits_behind: 0,
        approvals: 0,
        has_rejected_review: false,
        status_checks_passed: true,
        has_merged: false,
        merged_commit_id: None,
        merged_at: None,
        merger: None,
    }
}

/// Configuration with the given inactivity delay (negative disables it)
pub fn config_with_delay(days: i64) -> Config {
    let mut config = Config::default();
    config.pull_request.delay_check_for_inactive_days = days;
    config.queue.workers = 4;
    config.queue.batch_length = 1;
    config
}

/// Run git synchronously for fixture setup
pub fn git(dir: &Path, args: &[&str]) -> String {
    git_as(dir, "Test", "test@example.com", args)
}

/// Run git with the given author and committer identity
pub fn git_as(dir: &Path, name: &str, email: &str, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .arg("-c")
        .arg(format!("user.name={name}"))
        .arg("-c")
        .arg(format!("user.email={email}"))
        .args(["-c", "commit.gpgsign=false", "-c", "init.defaultBranch=main"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn commit_file(dir: &Path, file: &str, content: &str, message: &str) -> String {
    std::fs::write(dir.join(file), content).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}
