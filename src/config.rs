//! Configuration loaded from `config.toml`.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name for mergecheck within the user config directory.
const CONFIG_DIR: &str = "mergecheck";

/// Filename for configuration.
const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Merge request check policy
    pub pull_request: PullRequestConfig,
    /// Check queue settings
    pub queue: QueueConfig,
    /// Git execution settings
    pub git: GitConfig,
}

/// Merge request check policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PullRequestConfig {
    /// Skip queuing checks for requests inactive longer than this many days.
    /// Negative disables the delay.
    pub delay_check_for_inactive_days: i64,
    /// Title prefixes marking a request as work in progress
    pub work_in_progress_prefixes: Vec<String>,
}

impl Default for PullRequestConfig {
    fn default() -> Self {
        Self {
            delay_check_for_inactive_days: 7,
            work_in_progress_prefixes: vec!["WIP:".to_string(), "[WIP]".to_string()],
        }
    }
}

impl PullRequestConfig {
    /// Inactivity threshold after which checks are deferred, if enabled
    ///
    /// Saturates at [`Duration::MAX`] for day counts chrono cannot represent.
    pub fn inactive_delay(&self) -> Option<Duration> {
        (self.delay_check_for_inactive_days >= 0).then(|| {
            Duration::try_days(self.delay_check_for_inactive_days).unwrap_or(Duration::MAX)
        })
    }

    /// Whether a request last active at `updated_at` counts as inactive at
    /// `now`.
    ///
    /// A deadline past the representable range is never reached.
    pub fn is_inactive(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.inactive_delay()
            .and_then(|delay| updated_at.checked_add_signed(delay))
            .is_some_and(|deadline| deadline <= now)
    }

    /// Whether a title starts with one of the work-in-progress prefixes
    pub fn is_work_in_progress(&self, title: &str) -> bool {
        let title = title.trim_start().to_uppercase();
        self.work_in_progress_prefixes
            .iter()
            .any(|prefix| title.starts_with(&prefix.to_uppercase()))
    }
}

/// Check queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name, also the persisted file name
    pub name: String,
    /// Maximum number of batches processed concurrently
    pub workers: usize,
    /// Maximum number of tokens handed to one batch
    pub batch_length: usize,
    /// Directory for the durable queue file (in-memory only if unset)
    pub data_dir: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "pr_patch_checker".to_string(),
            workers: 1,
            batch_length: 20,
            data_dir: None,
        }
    }
}

/// Git execution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    /// Git executable
    pub binary: PathBuf,
    /// Per-command timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
            timeout_secs: 360,
        }
    }
}

/// Default config file location (`~/.config/mergecheck/config.toml` on Linux).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Load configuration from disk.
///
/// Uses `path` if given, otherwise the default location. Returns the default
/// configuration if the file doesn't exist.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path.map(Path::to_path_buf).or_else(default_config_path) else {
        return Ok(Config::default());
    };

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;

    if config.queue.workers == 0 || config.queue.batch_length == 0 {
        return Err(Error::Config(format!(
            "{}: queue.workers and queue.batch_length must be positive",
            path.display()
        )));
    }

    if Duration::try_days(config.pull_request.delay_check_for_inactive_days).is_none() {
        return Err(Error::Config(format!(
            "{}: pull_request.delay_check_for_inactive_days is out of range",
            path.display()
        )));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_returns_default() {
        let temp = TempDir::new().unwrap();
        let config = load_config(Some(&temp.path().join("config.toml"))).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.queue.name, "pr_patch_checker");
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[pull_request]\ndelay_check_for_inactive_days = -1\n\n[queue]\nworkers = 4\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.pull_request.delay_check_for_inactive_days, -1);
        assert_eq!(config.pull_request.work_in_progress_prefixes.len(), 2);
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.batch_length, 20);
        assert_eq!(config.git.timeout_secs, 360);
    }

    #[test]
    fn test_load_rejects_zero_workers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[queue]\nworkers = 0\n").unwrap();

        assert!(matches!(load_config(Some(&path)), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[queue\n").unwrap();

        match load_config(Some(&path)) {
            Err(Error::Config(msg)) => assert!(msg.contains("failed to parse")),
            other => panic!("Expected Config error, got: {other:?}"),
        }
    }

    #[test]
    fn test_inactive_delay() {
        let mut config = PullRequestConfig::default();
        assert_eq!(config.inactive_delay(), Some(Duration::days(7)));

        config.delay_check_for_inactive_days = 0;
        assert_eq!(config.inactive_delay(), Some(Duration::zero()));

        config.delay_check_for_inactive_days = -1;
        assert_eq!(config.inactive_delay(), None);

        config.delay_check_for_inactive_days = i64::MAX;
        assert_eq!(config.inactive_delay(), Some(Duration::MAX));
    }

    #[test]
    fn test_is_inactive_boundary() {
        let config = PullRequestConfig {
            delay_check_for_inactive_days: 3,
            ..Default::default()
        };
        let now = Utc::now();

        assert!(config.is_inactive(now - Duration::days(3), now));
        assert!(config.is_inactive(now - Duration::days(5), now));
        assert!(!config.is_inactive(now - Duration::days(3) + Duration::seconds(1), now));
    }

    #[test]
    fn test_is_inactive_huge_delay_never_expires() {
        let config = PullRequestConfig {
            delay_check_for_inactive_days: 1_000_000_000,
            ..Default::default()
        };
        let now = Utc::now();

        assert!(!config.is_inactive(now - Duration::days(1), now));
        assert!(!config.is_inactive(DateTime::<Utc>::MIN_UTC, now));
    }

    #[test]
    fn test_is_inactive_disabled() {
        let config = PullRequestConfig {
            delay_check_for_inactive_days: -1,
            ..Default::default()
        };
        let now = Utc::now();
        assert!(!config.is_inactive(now - Duration::days(10_000), now));
    }

    #[test]
    fn test_load_rejects_out_of_range_delay() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            format!("[pull_request]\ndelay_check_for_inactive_days = {}\n", i64::MAX),
        )
        .unwrap();

        match load_config(Some(&path)) {
            Err(Error::Config(msg)) => assert!(msg.contains("out of range")),
            other => panic!("Expected Config error, got: {other:?}"),
        }
    }

    #[test]
    fn test_work_in_progress_prefixes() {
        let config = PullRequestConfig::default();
        assert!(config.is_work_in_progress("WIP: add login"));
        assert!(config.is_work_in_progress("[wip] add login"));
        assert!(config.is_work_in_progress("  wip: add login"));
        assert!(!config.is_work_in_progress("Add WIP: support"));
        assert!(!config.is_work_in_progress("Wipe caches"));
    }
}
