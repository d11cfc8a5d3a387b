//! Persistence of the state file.

use super::{STATE_VERSION, StateData};
use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Directory name for mergecheck within the user data directory.
const STATE_DIR: &str = "mergecheck";

/// Filename for the state file.
const STATE_FILE: &str = "state.toml";

/// Default location of the state file.
pub fn default_state_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(STATE_DIR).join(STATE_FILE))
}

/// Kind of advisory lock held on the state file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LockMode {
    /// Readers share the file
    Shared,
    /// A read-modify-write excludes everyone else
    Exclusive,
}

/// Sidecar file carrying the advisory lock for `path`.
fn lock_path(path: &Path) -> PathBuf {
    path.with_extension("toml.lock")
}

/// Take an advisory lock on the state file at `path`.
///
/// The lock lives on a sidecar file, since the state file itself is
/// replaced by rename on every save. It is released when the returned
/// handle is dropped.
pub(super) fn lock_state(path: &Path, mode: LockMode) -> Result<File> {
    let lock_path = lock_path(path);
    if let Some(dir) = lock_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Store(format!("failed to create {}: {e}", dir.display())))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| Error::Store(format!("failed to open {}: {e}", lock_path.display())))?;

    let locked = match mode {
        LockMode::Shared => file.lock_shared(),
        LockMode::Exclusive => file.lock(),
    };
    locked.map_err(|e| Error::Store(format!("failed to lock {}: {e}", lock_path.display())))?;
    Ok(file)
}

/// Load state from disk.
///
/// Returns empty state if the file doesn't exist.
pub fn load_state(path: &Path) -> Result<StateData> {
    if !path.exists() {
        return Ok(StateData::new());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Store(format!("failed to read {}: {e}", path.display())))?;

    let state: StateData = toml::from_str(&content)
        .map_err(|e| Error::Store(format!("failed to parse {}: {e}", path.display())))?;

    if state.version > STATE_VERSION {
        return Err(Error::Store(format!(
            "{} has version {}, newer than supported version {STATE_VERSION}",
            path.display(),
            state.version
        )));
    }

    Ok(state)
}

/// Save state to disk.
///
/// Creates the parent directory if it doesn't exist.
pub fn save_state(path: &Path, state: &StateData) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Store(format!("failed to create {}: {e}", dir.display())))?;
    }

    let mut state_to_save = state.clone();
    state_to_save.version = STATE_VERSION;

    let content = toml::to_string_pretty(&state_to_save)
        .map_err(|e| Error::Store(format!("failed to serialize state: {e}")))?;

    let content_with_header =
        format!("# mergecheck state\n# Check results are written back by mergecheck\n\n{content}");

    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, content_with_header)
        .map_err(|e| Error::Store(format!("failed to write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| Error::Store(format!("failed to replace {}: {e}", path.display())))?;

    Ok(())
}
