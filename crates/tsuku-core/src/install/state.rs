use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use super::filelock::FileLock;
use tsuku_domain::State;

/// JSON state store with advisory locking: reads take a shared lock,
/// mutations an exclusive one. Writes go to a temp file and rename over
/// the original, so readers see either the old or the new state, never a
/// partial write.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(state_path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            lock_path: lock_path.into(),
        }
    }

    #[must_use]
    pub fn state_path(&self) -> &PathBuf {
        &self.state_path
    }

    /// Loads a snapshot under a shared lock. A missing file is an empty
    /// state, which covers first run.
    ///
    /// # Errors
    /// Returns an error for unreadable or corrupt state files.
    pub fn load(&self) -> Result<State> {
        let _guard = FileLock::shared(&self.lock_path)?;
        self.read()
    }

    /// Runs a mutation under the exclusive lock: load, apply, write. When
    /// the closure fails nothing is written, so state never reflects a
    /// half-finished operation.
    ///
    /// # Errors
    /// Propagates closure errors and I/O failures.
    pub fn mutate<T>(&self, apply: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let _guard = FileLock::exclusive(&self.lock_path)?;
        let mut state = self.read()?;
        let out = apply(&mut state)?;
        self.write(&state)?;
        Ok(out)
    }

    /// State is authoritative for installedness; the filesystem is not
    /// consulted.
    ///
    /// # Errors
    /// Returns an error when the state file cannot be read.
    pub fn is_installed(&self, tool: &str, version: &str) -> Result<bool> {
        Ok(self.load()?.is_installed(tool, version))
    }

    fn read(&self) -> Result<State> {
        let raw = match fs::read_to_string(&self.state_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(State::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.state_path.display()));
            }
        };
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid state file {}", self.state_path.display()))
    }

    fn write(&self, state: &State) -> Result<()> {
        let parent = self
            .state_path
            .parent()
            .context("state path has no parent directory")?;
        fs::create_dir_all(parent)?;
        let mut encoded = serde_json::to_vec_pretty(state).context("failed to encode state")?;
        encoded.push(b'\n');

        let tmp = NamedTempFile::new_in(parent).context("failed to create state temp file")?;
        fs::write(tmp.path(), &encoded)?;
        tmp.persist(&self.state_path)
            .with_context(|| format!("failed to replace {}", self.state_path.display()))?;
        Ok(())
    }
}
