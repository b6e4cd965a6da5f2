use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const ENV_HOME: &str = "TSUKU_HOME";
pub const ENV_DEBUG: &str = "TSUKU_DEBUG";
pub const ENV_NO_TELEMETRY: &str = "TSUKU_NO_TELEMETRY";

/// Root of the per-user tsuku directory tree.
///
/// ```text
/// $TSUKU_HOME/
///   tools/<name>-<version>/bin/<exe>   immutable trees
///   libs/<name>-<version>/...
///   current/<exe>                      atomic symlinks into tools/
///   recipes/<name>.toml
///   cache/                             download cache
///   state.json
///   state.lock
///   config.toml
///   telemetry_notice_shown
/// ```
#[derive(Clone, Debug)]
pub struct TsukuHome {
    root: PathBuf,
}

impl TsukuHome {
    /// Resolves the home directory from `TSUKU_HOME`, falling back to
    /// `~/.tsuku`.
    ///
    /// # Errors
    /// Returns an error when no home directory can be determined.
    pub fn from_env() -> Result<Self> {
        if let Some(dir) = env::var_os(ENV_HOME).filter(|v| !v.is_empty()) {
            return Ok(Self { root: dir.into() });
        }
        let home = dirs_next::home_dir().context("could not determine the user home directory")?;
        Ok(Self {
            root: home.join(".tsuku"),
        })
    }

    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn tools_dir(&self) -> PathBuf {
        self.root.join("tools")
    }

    #[must_use]
    pub fn libs_dir(&self) -> PathBuf {
        self.root.join("libs")
    }

    #[must_use]
    pub fn current_dir(&self) -> PathBuf {
        self.root.join("current")
    }

    #[must_use]
    pub fn recipes_dir(&self) -> PathBuf {
        self.root.join("recipes")
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join("state.lock")
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    #[must_use]
    pub fn notice_marker_path(&self) -> PathBuf {
        self.root.join("telemetry_notice_shown")
    }

    /// Creates the directory skeleton if it does not exist yet.
    ///
    /// # Errors
    /// Returns an error when a directory cannot be created.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.tools_dir(),
            self.libs_dir(),
            self.current_dir(),
            self.recipes_dir(),
            self.cache_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Whether `TSUKU_DEBUG` asks for extra action output.
#[must_use]
pub fn debug_enabled() -> bool {
    env::var(ENV_DEBUG).map(|v| env_truthy(&v)).unwrap_or(false)
}

/// Truthy env values are `1 | true | yes | on`, case-insensitive.
#[must_use]
pub fn env_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn env_truthy_accepts_documented_values() {
        for value in ["1", "true", "YES", "On", " true "] {
            assert!(env_truthy(value), "expected {value:?} to be truthy");
        }
        for value in ["", "0", "false", "off", "2", "enabled"] {
            assert!(!env_truthy(value), "expected {value:?} to be falsy");
        }
    }

    #[test]
    #[serial]
    fn home_prefers_env_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        env::set_var(ENV_HOME, dir.path());
        let home = TsukuHome::from_env().expect("home");
        assert_eq!(home.root(), dir.path());
        assert_eq!(home.tools_dir(), dir.path().join("tools"));
        env::remove_var(ENV_HOME);
    }

    #[test]
    fn ensure_layout_creates_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = TsukuHome::at(dir.path().join("tsuku"));
        home.ensure_layout().expect("layout");
        assert!(home.tools_dir().is_dir());
        assert!(home.current_dir().is_dir());
        assert!(home.recipes_dir().is_dir());
    }
}
