//! Persistence for queued tokens in `<data_dir>/<queue>.toml`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current on-disk format version.
pub(super) const QUEUE_FILE_VERSION: u32 = 1;

/// Tokens that were pending or in flight when last saved.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub(super) struct QueueSnapshot {
    /// Format version
    pub version: u32,
    /// Tokens in delivery order
    pub tokens: Vec<String>,
}

/// Path of the queue file for `name` inside `dir`.
pub(super) fn queue_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.toml"))
}

/// Load queued tokens from disk.
///
/// Returns no tokens if the file doesn't exist.
pub(super) fn load_tokens(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Queue(format!("failed to read {}: {e}", path.display())))?;

    let snapshot: QueueSnapshot = toml::from_str(&content)
        .map_err(|e| Error::Queue(format!("failed to parse {}: {e}", path.display())))?;

    if snapshot.version > QUEUE_FILE_VERSION {
        return Err(Error::Queue(format!(
            "{} was written by a newer version (format {})",
            path.display(),
            snapshot.version
        )));
    }

    Ok(snapshot.tokens)
}

/// Save queued tokens to disk.
///
/// Writes a sibling temp file and renames it over the target so a crash
/// never leaves a truncated queue behind.
pub(super) fn save_tokens(path: &Path, tokens: &[String]) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| Error::Queue(format!("failed to create {}: {e}", dir.display())))?;
        }
    }

    let snapshot = QueueSnapshot {
        version: QUEUE_FILE_VERSION,
        tokens: tokens.to_vec(),
    };
    let content = toml::to_string_pretty(&snapshot)
        .map_err(|e| Error::Queue(format!("failed to serialize queue: {e}")))?;

    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, content)
        .map_err(|e| Error::Queue(format!("failed to write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| Error::Queue(format!("failed to replace {}: {e}", path.display())))?;

    Ok(())
}
