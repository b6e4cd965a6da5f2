use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use time::OffsetDateTime;
use tracing::debug;
use walkdir::WalkDir;

use super::state::StateStore;
use super::symlink::{atomic_symlink, validate_symlink_target};
use crate::config::TsukuHome;
use tsuku_domain::{LibraryState, State, ToolState, VersionState};

/// Promotes finished workspaces into `$TSUKU_HOME` and keeps the state
/// file, per-version tool trees, and `current/` symlinks consistent.
///
/// Every mutating operation runs inside [`StateStore::mutate`], so the
/// exclusive file lock covers both the filesystem moves and the state
/// update, and a failure before promotion leaves state untouched.
pub struct InstallManager {
    home: TsukuHome,
    store: StateStore,
}

#[derive(Debug, Default)]
pub struct LibraryInstallOptions {
    /// `"<tool>-<version>"` of the consuming installation, reference
    /// counted in the library's `used_by`.
    pub used_by: Option<String>,
}

impl InstallManager {
    #[must_use]
    pub fn new(home: TsukuHome) -> Self {
        let store = StateStore::new(home.state_path(), home.lock_path());
        Self { home, store }
    }

    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Moves `workspace/.install` into `tools/<name>-<version>/` and swaps
    /// `current/<binary>` symlinks atomically.
    ///
    /// # Errors
    /// Returns an error for invalid names, missing binaries, or symlink
    /// targets outside the tools directory.
    pub fn install_tool(
        &self,
        name: &str,
        version: &str,
        workspace: &Path,
        binaries: &[String],
    ) -> Result<()> {
        validate_path_component(name, "tool name")?;
        validate_path_component(version, "version")?;
        if binaries.is_empty() {
            bail!("refusing to install {name} {version}: no binaries to promote");
        }

        let staged = workspace.join(".install");
        if !staged.is_dir() {
            bail!("workspace has no .install directory at {}", staged.display());
        }
        let tools_dir = self.home.tools_dir();
        let dest = tools_dir.join(format!("{name}-{version}"));

        self.store.mutate(|state| {
            if dest.exists() {
                fs::remove_dir_all(&dest)
                    .with_context(|| format!("failed to clear {}", dest.display()))?;
            }
            fs::create_dir_all(&tools_dir)?;
            move_dir(&staged, &dest)?;
            debug!(tool = name, version, dest = %dest.display(), "promoted workspace");

            let current = self.home.current_dir();
            fs::create_dir_all(&current)?;
            let mut exposed = Vec::new();
            for binary in binaries {
                let relative = binary_relative_path(binary);
                let target = dest.join(&relative);
                if !target.exists() {
                    bail!(
                        "declared binary {binary:?} missing from promoted tree at {}",
                        target.display()
                    );
                }
                validate_symlink_target(&target, &tools_dir)?;
                let base = base_name(binary)?;
                atomic_symlink(&target, &current.join(&base))?;
                exposed.push(base);
            }

            let tool = state
                .installed
                .entry(name.to_string())
                .or_insert_with(ToolState::default);
            tool.active_version = version.to_string();
            tool.binaries = exposed;
            tool.versions.insert(
                version.to_string(),
                VersionState {
                    binaries: binaries.to_vec(),
                    installed_at: OffsetDateTime::now_utc(),
                },
            );
            Ok(())
        })
    }

    /// Moves `workspace/.install` into `libs/<name>-<version>/` and records
    /// the consumer, when one is given, in `used_by`.
    ///
    /// # Errors
    /// Returns an error for invalid names or a missing staging tree.
    pub fn install_library(
        &self,
        name: &str,
        version: &str,
        workspace: &Path,
        opts: LibraryInstallOptions,
    ) -> Result<()> {
        validate_path_component(name, "library name")?;
        validate_path_component(version, "version")?;
        let staged = workspace.join(".install");
        if !staged.is_dir() {
            bail!("workspace has no .install directory at {}", staged.display());
        }
        let dest = self.home.libs_dir().join(format!("{name}-{version}"));

        self.store.mutate(|state| {
            if !dest.exists() {
                fs::create_dir_all(self.home.libs_dir())?;
                move_dir(&staged, &dest)?;
            }
            let entry = state
                .libs
                .entry(name.to_string())
                .or_default()
                .entry(version.to_string())
                .or_insert_with(LibraryState::default);
            if let Some(consumer) = &opts.used_by {
                if !entry.used_by.contains(consumer) {
                    entry.used_by.push(consumer.clone());
                }
            }
            Ok(())
        })
    }

    /// Removes one installed version: its tree, any `current/` symlinks
    /// pointing into it, and its state entry. Removing the active version
    /// re-activates the remaining version with the newest `installed_at`;
    /// removing the last version deletes the tool entirely.
    ///
    /// # Errors
    /// Returns an error when the version is not installed or the version
    /// string carries path metacharacters.
    pub fn remove_version(&self, name: &str, version: &str) -> Result<()> {
        validate_path_component(name, "tool name")?;
        validate_path_component(version, "version")?;
        let tools_dir = self.home.tools_dir();
        let dir = tools_dir.join(format!("{name}-{version}"));
        let current = self.home.current_dir();

        self.store.mutate(|state| {
            let Some(tool) = state.installed.get_mut(name) else {
                bail!("tool {name} is not installed");
            };
            if tool.versions.remove(version).is_none() {
                bail!("tool {name} has no installed version {version}");
            }

            remove_links_into(&current, &dir)?;
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("failed to remove {}", dir.display()))?;
            }

            if tool.active_version == version {
                let next = tool
                    .versions
                    .iter()
                    .max_by_key(|(_, v)| v.installed_at)
                    .map(|(candidate, v)| (candidate.clone(), v.binaries.clone()));
                match next {
                    Some((next_version, binaries)) => {
                        let next_dir = tools_dir.join(format!("{name}-{next_version}"));
                        let mut exposed = Vec::new();
                        for binary in &binaries {
                            let target = next_dir.join(binary_relative_path(binary));
                            validate_symlink_target(&target, &tools_dir)?;
                            let base = base_name(binary)?;
                            atomic_symlink(&target, &current.join(&base))?;
                            exposed.push(base);
                        }
                        tool.active_version = next_version;
                        tool.binaries = exposed;
                    }
                    None => {
                        state.installed.remove(name);
                    }
                }
            }
            Ok(())
        })
    }

    /// Removes every installed version of a tool.
    ///
    /// # Errors
    /// Returns an error when the tool is unknown.
    pub fn remove_all_versions(&self, name: &str) -> Result<()> {
        let versions: Vec<String> = {
            let state = self.store.load()?;
            let Some(tool) = state.installed.get(name) else {
                bail!("tool {name} is not installed");
            };
            tool.versions.keys().cloned().collect()
        };
        for version in versions {
            self.remove_version(name, &version)?;
        }
        Ok(())
    }

    /// Removes a library version. Permitted only when no installed tool
    /// still references it.
    ///
    /// # Errors
    /// Returns an error when the library is unknown or still in use.
    pub fn remove_library(&self, name: &str, version: &str) -> Result<()> {
        validate_path_component(name, "library name")?;
        validate_path_component(version, "version")?;
        let dir = self.home.libs_dir().join(format!("{name}-{version}"));

        self.store.mutate(|state| {
            let Some(versions) = state.libs.get_mut(name) else {
                bail!("library {name} is not installed");
            };
            let Some(entry) = versions.get(version) else {
                bail!("library {name} has no installed version {version}");
            };
            if !entry.used_by.is_empty() {
                bail!(
                    "library {name} {version} is still used by: {}",
                    entry.used_by.join(", ")
                );
            }
            versions.remove(version);
            if versions.is_empty() {
                state.libs.remove(name);
            }
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("failed to remove {}", dir.display()))?;
            }
            Ok(())
        })
    }

    /// Drops a consumer from a library's `used_by` list.
    ///
    /// # Errors
    /// Returns an error when the state file cannot be updated.
    pub fn release_library(&self, name: &str, version: &str, consumer: &str) -> Result<()> {
        self.store.mutate(|state| {
            if let Some(entry) = state
                .libs
                .get_mut(name)
                .and_then(|versions| versions.get_mut(version))
            {
                entry.used_by.retain(|existing| existing != consumer);
            }
            Ok(())
        })
    }

    /// All installed libraries as `(name, version, state)` rows.
    ///
    /// # Errors
    /// Returns an error when the state file cannot be read.
    pub fn list_libraries(&self) -> Result<Vec<(String, String, LibraryState)>> {
        let state = self.store.load()?;
        let mut out = Vec::new();
        for (name, versions) in &state.libs {
            for (version, entry) in versions {
                out.push((name.clone(), version.clone(), entry.clone()));
            }
        }
        Ok(out)
    }

    /// Filesystem probe for bootstrap cases where state is missing; state
    /// stays authoritative everywhere else.
    #[must_use]
    pub fn check_library_installed(&self, name: &str, version: &str) -> bool {
        self.home
            .libs_dir()
            .join(format!("{name}-{version}"))
            .is_dir()
    }

    /// Installed tools snapshot for listings.
    ///
    /// # Errors
    /// Returns an error when the state file cannot be read.
    pub fn installed_tools(&self) -> Result<State> {
        self.store.load()
    }
}

/// Tool and version strings become path components; anything that could
/// traverse is rejected up front.
fn validate_path_component(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        bail!("{what} must not be empty");
    }
    if value.contains('/') || value.contains('\\') || value.contains("..") {
        bail!("invalid {what} {value:?}: path separators are not allowed");
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'))
    {
        bail!("invalid {what} {value:?}");
    }
    Ok(())
}

/// Declared binaries are either bare names (conventionally under `bin/`)
/// or explicit paths relative to the version root.
fn binary_relative_path(binary: &str) -> PathBuf {
    if binary.contains('/') {
        PathBuf::from(binary)
    } else {
        Path::new("bin").join(binary)
    }
}

fn base_name(binary: &str) -> Result<String> {
    binary
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .with_context(|| format!("binary entry {binary:?} has no file name"))
}

/// Rename, falling back to a recursive copy for cross-device moves.
fn move_dir(src: &Path, dest: &Path) -> Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_dir_recursive(src, dest)?;
            fs::remove_dir_all(src)
                .with_context(|| format!("failed to clean staging dir {}", src.display()))?;
            Ok(())
        }
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .context("walkdir produced a path outside its root")?;
        let out = dest.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&out)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            {
                let target = fs::read_link(entry.path())?;
                if let Some(parent) = out.parent() {
                    fs::create_dir_all(parent)?;
                }
                let _ = fs::remove_file(&out);
                std::os::unix::fs::symlink(target, &out)?;
            }
            #[cfg(not(unix))]
            {
                fs::copy(entry.path(), &out)?;
            }
        } else {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &out)?;
        }
    }
    Ok(())
}

/// Removes symlinks in `current/` whose target resolves into `dir`.
fn remove_links_into(current: &Path, dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(current) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", current.display()));
        }
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Ok(target) = fs::read_link(&path) else {
            continue;
        };
        let absolute = if target.is_absolute() {
            target
        } else {
            current.join(target)
        };
        if absolute.starts_with(dir) {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove symlink {}", path.display()))?;
        }
    }
    Ok(())
}
