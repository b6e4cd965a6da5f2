//! Plan execution: a per-install workspace, the step loop, verification,
//! and promotion through the install manager.

mod plan_generator;

pub use plan_generator::{
    compute_recipe_hash, generate_plan, host_platform, PlanOptions, RecipeLoader,
};

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::actions::{ActionRegistry, ExecutionContext};
use crate::cancel::CancelToken;
use crate::config::TsukuHome;
use crate::download::DownloadCache;
use crate::install::{InstallManager, LibraryInstallOptions};
use crate::process::run_command;
use tsuku_domain::{InstallationPlan, PlanVerify};

/// Consumes installation plans: one fresh workspace per run, steps in plan
/// order, verification, then promotion. The workspace is removed on every
/// exit path unless `keep_workspace` is set.
pub struct Executor<'a> {
    registry: &'a ActionRegistry,
    home: TsukuHome,
    cache: Option<&'a DownloadCache>,
    keep_workspace: bool,
    force: bool,
}

impl<'a> Executor<'a> {
    #[must_use]
    pub fn new(registry: &'a ActionRegistry, home: TsukuHome) -> Self {
        Self {
            registry,
            home,
            cache: None,
            keep_workspace: false,
            force: false,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: &'a DownloadCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Debug aid: leave the workspace behind after the run.
    #[must_use]
    pub fn keep_workspace(mut self, keep: bool) -> Self {
        self.keep_workspace = keep;
        self
    }

    /// Reinstall even when state already lists this tool/version.
    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Runs a plan to completion and promotes the result.
    ///
    /// # Errors
    /// Any step failure, verification failure, or promotion failure aborts;
    /// state is only touched by a successful promotion.
    pub fn execute_plan(&self, cancel: &CancelToken, plan: &InstallationPlan) -> Result<()> {
        let manager = InstallManager::new(self.home.clone());
        if !self.force
            && manager
                .store()
                .is_installed(&plan.tool, &plan.version)
                .unwrap_or(false)
        {
            info!(tool = %plan.tool, version = %plan.version, "already installed");
            return Ok(());
        }

        let workspace = tempfile::Builder::new()
            .prefix("tsuku-")
            .tempdir()
            .context("failed to create workspace")?;
        let work_dir = workspace.path().to_path_buf();
        let install_dir = work_dir.join(".install");
        fs::create_dir_all(&install_dir)?;
        debug!(workspace = %work_dir.display(), tool = %plan.tool, "created workspace");

        let result = self.run_steps(cancel, plan, &work_dir, &install_dir);
        let result = result.and_then(|()| self.verify(plan, &install_dir));
        let result = result.and_then(|()| self.promote(&manager, plan, &work_dir));

        if self.keep_workspace {
            let kept = workspace.into_path();
            warn!(workspace = %kept.display(), "workspace preserved for debugging");
        }
        // Otherwise the TempDir guard removes the tree on drop, success or
        // failure alike.
        result
    }

    fn run_steps(
        &self,
        cancel: &CancelToken,
        plan: &InstallationPlan,
        work_dir: &Path,
        install_dir: &Path,
    ) -> Result<()> {
        let ctx = ExecutionContext {
            cancel: cancel.clone(),
            work_dir: work_dir.to_path_buf(),
            install_dir: install_dir.to_path_buf(),
            tools_dir: self.home.tools_dir(),
            tool_name: plan.tool.clone(),
            version: plan.version.clone(),
            version_tag: plan.version.clone(),
            exec_paths: vec![self.home.current_dir()],
            cache: self.cache,
        };

        for step in &plan.steps {
            cancel.ensure_active()?;
            let Some(action) = self.registry.get(&step.action) else {
                bail!("unknown action '{}' in plan", step.action);
            };
            let report = action.preflight(&step.params);
            if !report.is_ok() {
                bail!(
                    "{} preflight failed: {}",
                    step.action,
                    report.errors.join("; ")
                );
            }
            for warning in &report.warnings {
                warn!(action = %step.action, %warning, "preflight warning");
            }
            debug!(action = %step.action, "executing step");
            action
                .execute(&ctx, &step.params)
                .with_context(|| format!("step {} failed", step.action))?;
        }
        Ok(())
    }

    /// Runs the verify command with the staged `bin/` on PATH; pass
    /// requires the expected exit code and, when given, the pattern as a
    /// substring of combined output.
    fn verify(&self, plan: &InstallationPlan, install_dir: &Path) -> Result<()> {
        let Some(PlanVerify {
            command,
            pattern,
            exit_code,
        }) = &plan.verify
        else {
            return Ok(());
        };

        let mut path = format!("{}", install_dir.join("bin").display());
        path.push(':');
        path.push_str(&self.home.current_dir().display().to_string());
        if let Ok(existing) = std::env::var("PATH") {
            path.push(':');
            path.push_str(&existing);
        }

        let output = run_command(
            "/bin/sh",
            &["-c".to_string(), command.clone()],
            &[("PATH".to_string(), path)],
            install_dir,
        )?;
        let expected = exit_code.unwrap_or(0);
        let combined = format!("{}{}", output.stdout, output.stderr);
        if output.code != expected {
            bail!(
                "verification command {command:?} exited with {} (expected {expected}): {}",
                output.code,
                combined.trim()
            );
        }
        if let Some(pattern) = pattern {
            if !combined.contains(pattern) {
                bail!(
                    "verification output did not contain {pattern:?}: {}",
                    combined.trim()
                );
            }
        }
        debug!(%command, "verification passed");
        Ok(())
    }

    fn promote(
        &self,
        manager: &InstallManager,
        plan: &InstallationPlan,
        work_dir: &Path,
    ) -> Result<()> {
        if plan.recipe_type == "library" {
            return manager.install_library(
                &plan.tool,
                &plan.version,
                work_dir,
                LibraryInstallOptions::default(),
            );
        }
        let binaries = discover_binaries(&work_dir.join(".install"))?;
        if binaries.is_empty() {
            bail!(
                "no executables found under .install/bin for {} {}",
                plan.tool,
                plan.version
            );
        }
        manager.install_tool(&plan.tool, &plan.version, work_dir, &binaries)?;
        info!(tool = %plan.tool, version = %plan.version, "installed");
        Ok(())
    }
}

/// The promoted binary list is whatever landed in `install_dir/bin`.
fn discover_binaries(install_dir: &Path) -> Result<Vec<String>> {
    let bin_dir = install_dir.join("bin");
    let mut out = Vec::new();
    let entries = match fs::read_dir(&bin_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", bin_dir.display()));
        }
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            out.push(name.to_string());
        }
    }
    out.sort();
    Ok(out)
}

/// Loads recipes from a directory of `<name>.toml` files, the layout used
/// by `$TSUKU_HOME/recipes/`.
pub struct DirRecipeLoader {
    dir: PathBuf,
}

impl DirRecipeLoader {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl RecipeLoader for DirRecipeLoader {
    fn load(&self, name: &str) -> Result<tsuku_domain::Recipe> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            bail!("invalid recipe name {name:?}");
        }
        let path = self.dir.join(format!("{name}.toml"));
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("recipe {name} not found at {}", path.display()))?;
        tsuku_domain::Recipe::from_toml(&raw)
    }
}
