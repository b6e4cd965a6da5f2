//! The action registry: the unit of recipe composition.
//!
//! Primitives execute directly against an [`ExecutionContext`];
//! decomposable actions exist only at recipe level and expand into
//! primitives during plan generation. Registration happens once, before
//! any plan is built, via [`registry`].

pub mod params;

mod apply_patch;
mod cargo_build;
mod chmod;
mod download_archive;
mod download_file;
mod extract;
mod gem_exec;
mod github_archive;
mod github_file;
mod homebrew;
mod install_binaries;
mod install_gem_direct;
mod nix_realize;
mod npm_install;
mod pip_exec;
mod pipx_install;
mod run_shell;
mod set_rpath;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{bail, Result};

use crate::cancel::CancelToken;
use crate::download::{DownloadCache, Downloader};
use crate::template::Vars;
use crate::toolchain;
use crate::version::Resolver;
use tsuku_domain::{Params, Recipe};

/// Result of validating parameters before execution. Errors are fatal;
/// warnings surface at plan time.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PreflightReport {
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Dependencies an action declares: tools that must be installed before it
/// runs, tools the installed artifact needs at runtime, and tools that must
/// be on PATH while `decompose` evaluates.
#[derive(Clone, Debug, Default)]
pub struct ActionDeps {
    pub install_time: Vec<String>,
    pub runtime: Vec<String>,
    pub eval_time: Vec<String>,
}

/// A primitive step emitted by `decompose`. A checksum may be attached when
/// the decomposition already verified the download (URLs behind special
/// auth).
#[derive(Clone, Debug)]
pub struct PrimitiveStep {
    pub action: String,
    pub params: Params,
    pub checksum: Option<String>,
    pub size: Option<u64>,
}

impl PrimitiveStep {
    #[must_use]
    pub fn new(action: impl Into<String>, params: Params) -> Self {
        Self {
            action: action.into(),
            params,
            checksum: None,
            size: None,
        }
    }
}

/// Context available while decomposing composites at plan time.
pub struct EvalContext<'a> {
    pub cancel: &'a CancelToken,
    pub version: String,
    pub version_tag: String,
    pub os: String,
    pub arch: String,
    pub recipe: &'a Recipe,
    pub resolver: &'a Resolver,
    pub downloader: Option<&'a dyn Downloader>,
    pub cache: Option<&'a DownloadCache>,
}

impl EvalContext<'_> {
    /// The standard plan-time variable map.
    #[must_use]
    pub fn vars(&self) -> Vars {
        let mut vars = Vars::new();
        vars.insert("version".into(), self.version.clone());
        vars.insert("version_tag".into(), self.version_tag.clone());
        vars.insert("os".into(), self.os.clone());
        vars.insert("arch".into(), self.arch.clone());
        vars
    }
}

/// Per-install runtime bundle passed to every executing action.
pub struct ExecutionContext<'a> {
    pub cancel: CancelToken,
    /// Ephemeral staging root, removed when the install finishes.
    pub work_dir: PathBuf,
    /// Subdirectory of `work_dir` where artifacts land before promotion.
    pub install_dir: PathBuf,
    /// Read-only view of `$TSUKU_HOME/tools` for finding peer tools.
    pub tools_dir: PathBuf,
    pub tool_name: String,
    pub version: String,
    pub version_tag: String,
    /// Bin directories of already-installed install-time dependencies,
    /// prepended to PATH for subprocesses.
    pub exec_paths: Vec<PathBuf>,
    pub cache: Option<&'a DownloadCache>,
}

impl ExecutionContext<'_> {
    /// The standard execution-time variable map.
    #[must_use]
    pub fn vars(&self) -> Vars {
        let mut vars = Vars::new();
        vars.insert("version".into(), self.version.clone());
        vars.insert("version_tag".into(), self.version_tag.clone());
        vars.insert("install_dir".into(), self.install_dir.display().to_string());
        vars.insert("work_dir".into(), self.work_dir.display().to_string());
        vars
    }

    /// PATH value with dependency bin dirs prepended.
    #[must_use]
    pub fn path_env(&self) -> String {
        let mut parts: Vec<String> = self
            .exec_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        if let Ok(existing) = std::env::var("PATH") {
            parts.push(existing);
        }
        parts.join(":")
    }

    /// Finds a binary inside an installed peer tool
    /// (`tools/<tool>-<version>/bin/<binary>`), newest directory first.
    #[must_use]
    pub fn find_peer_binary(&self, tool: &str, binary: &str) -> Option<PathBuf> {
        let prefix = format!("{tool}-");
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&self.tools_dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(&prefix))
            })
            .map(|entry| entry.path().join("bin").join(binary))
            .filter(|path| path.exists())
            .collect();
        candidates.sort();
        candidates.pop()
    }
}

/// An action value: name, parameter preflight, execution, capability bits,
/// and optional decomposition into primitives.
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    fn preflight(&self, params: &Params) -> PreflightReport {
        let _ = params;
        PreflightReport::ok()
    }

    /// # Errors
    /// A non-nil error aborts the pipeline; no promotion occurs.
    fn execute(&self, ctx: &ExecutionContext, params: &Params) -> Result<()>;

    /// Advisory determinism bit; the plan's `deterministic` is the AND of
    /// all steps'.
    fn is_deterministic(&self) -> bool {
        true
    }

    fn requires_network(&self) -> bool {
        false
    }

    /// Whether the effect is a pure function of declared inputs plus the
    /// pre-downloaded asset cache. Non-evaluable actions are permitted but
    /// warn at plan time.
    fn is_evaluable(&self) -> bool {
        true
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps::default()
    }

    fn is_decomposable(&self) -> bool {
        false
    }

    /// Expands a composite into primitive steps. Only meaningful when
    /// `is_decomposable` returns true.
    ///
    /// # Errors
    /// Primitives fail; composites may fail on network or invalid params.
    fn decompose(&self, ctx: &EvalContext, params: &Params) -> Result<Vec<PrimitiveStep>> {
        let _ = (ctx, params);
        bail!("action '{}' does not decompose", self.name())
    }
}

/// Name-keyed table of registered actions.
pub struct ActionRegistry {
    actions: BTreeMap<&'static str, Box<dyn Action>>,
}

impl ActionRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            actions: BTreeMap::new(),
        }
    }

    /// The builtin set. Call once at startup; [`registry`] memoizes it.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        register_builtin_actions(&mut registry);
        registry
    }

    pub fn register(&mut self, action: Box<dyn Action>) {
        self.actions.insert(action.name(), action);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Action> {
        self.actions.get(name).map(Box::as_ref)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.actions.keys().copied().collect()
    }

    #[must_use]
    pub fn is_decomposable(&self, name: &str) -> bool {
        self.get(name).is_some_and(Action::is_decomposable)
    }

    #[must_use]
    pub fn is_deterministic(&self, name: &str) -> bool {
        self.get(name).is_some_and(Action::is_deterministic)
    }

    #[must_use]
    pub fn is_evaluable(&self, name: &str) -> bool {
        self.get(name).is_some_and(Action::is_evaluable)
    }

    /// Runs an action's preflight, folding unknown names and parameter
    /// errors into one result.
    ///
    /// # Errors
    /// Returns an error for unknown actions and preflight failures.
    pub fn validate(&self, name: &str, params: &Params) -> Result<()> {
        let Some(action) = self.get(name) else {
            bail!("unknown action '{name}'");
        };
        let report = action.preflight(params);
        if !report.is_ok() {
            bail!("{name} preflight failed: {}", report.errors.join("; "));
        }
        Ok(())
    }
}

/// Registers every builtin action into the registry.
pub fn register_builtin_actions(registry: &mut ActionRegistry) {
    // Primitives.
    registry.register(Box::new(download_file::DownloadFileAction));
    registry.register(Box::new(extract::ExtractAction));
    registry.register(Box::new(chmod::ChmodAction));
    registry.register(Box::new(install_binaries::InstallBinariesAction));
    registry.register(Box::new(apply_patch::ApplyPatchAction));
    registry.register(Box::new(set_rpath::SetRpathAction));
    registry.register(Box::new(run_shell::RunShellAction));
    registry.register(Box::new(pip_exec::PipExecAction));
    registry.register(Box::new(cargo_build::CargoBuildAction));
    registry.register(Box::new(gem_exec::GemExecAction));
    registry.register(Box::new(install_gem_direct::InstallGemDirectAction));
    registry.register(Box::new(nix_realize::NixRealizeAction));
    registry.register(Box::new(npm_install::NpmExecAction));
    // Composites.
    registry.register(Box::new(download_archive::DownloadAction));
    registry.register(Box::new(download_archive::DownloadArchiveAction));
    registry.register(Box::new(github_archive::GithubArchiveAction));
    registry.register(Box::new(github_file::GithubFileAction));
    registry.register(Box::new(homebrew::HomebrewAction));
    registry.register(Box::new(npm_install::NpmInstallAction));
    registry.register(Box::new(pipx_install::PipxInstallAction));
}

/// Process-wide registry, built before any plan is generated.
pub fn registry() -> &'static ActionRegistry {
    static REGISTRY: OnceLock<ActionRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ActionRegistry::builtin)
}

/// Merges a recipe's declared dependencies with the dependencies of every
/// action its steps use.
#[must_use]
pub fn resolve_dependencies(recipe: &Recipe, registry: &ActionRegistry) -> ActionDeps {
    let mut deps = ActionDeps::default();
    for name in &recipe.metadata.dependencies {
        push_unique(&mut deps.install_time, name);
    }
    for step in &recipe.steps {
        if let Some(action) = registry.get(&step.action) {
            let action_deps = action.dependencies();
            for name in &action_deps.install_time {
                push_unique(&mut deps.install_time, name);
            }
            for name in &action_deps.runtime {
                push_unique(&mut deps.runtime, name);
            }
            for name in &action_deps.eval_time {
                push_unique(&mut deps.eval_time, name);
            }
        }
    }
    deps
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

/// Which eval-time dependencies are absent from the host.
#[must_use]
pub fn missing_eval_deps(deps: &[String]) -> Vec<String> {
    deps.iter()
        .filter(|dep| !toolchain::is_available(dep))
        .cloned()
        .collect()
}

/// Copies a file, creating parent directories, preserving the executable
/// bit the way install steps need it.
pub(crate) fn copy_binary(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dest)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(dest)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(dest, perms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_registry_has_sorted_known_names() {
        let names = registry().names();
        for expected in [
            "download_file",
            "extract",
            "chmod",
            "install_binaries",
            "github_archive",
            "apply_patch",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn validate_rejects_unknown_actions() {
        let err = registry()
            .validate("nonexistent_action", &Params::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown action 'nonexistent_action'");
    }

    #[test]
    fn validate_runs_preflight() {
        // download_file requires a url.
        assert!(registry().validate("download_file", &Params::new()).is_err());
        let params = json!({ "url": "https://example.com/a" })
            .as_object()
            .cloned()
            .unwrap();
        assert!(registry().validate("download_file", &params).is_ok());
        // chmod has no required params.
        assert!(registry().validate("chmod", &Params::new()).is_ok());
    }

    #[test]
    fn composites_advertise_decomposability() {
        for composite in [
            "download",
            "download_archive",
            "github_archive",
            "github_file",
            "homebrew",
            "npm_install",
            "pipx_install",
        ] {
            assert!(
                registry().is_decomposable(composite),
                "{composite} should decompose"
            );
        }
        for primitive in ["download_file", "extract", "run_shell"] {
            assert!(!registry().is_decomposable(primitive));
        }
    }

    #[test]
    fn recipe_dependencies_merge_with_action_dependencies() {
        let recipe = Recipe::from_toml(
            r#"
[metadata]
name = "demo"
dependencies = ["libyaml"]

[version]
source = "static"
version = "1.0.0"

[[steps]]
action = "pip_exec"
[steps.params]
package = "demo"
"#,
        )
        .expect("recipe");
        let deps = resolve_dependencies(&recipe, registry());
        assert!(deps.install_time.contains(&"libyaml".to_string()));
        assert!(deps.install_time.contains(&"python-standalone".to_string()));
        assert!(deps.runtime.contains(&"python-standalone".to_string()));
    }
}
