use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::debug;

use super::{copy_binary, params, Action, ActionDeps, ExecutionContext, PreflightReport};
use crate::process::run_command;
use tsuku_domain::Params;

/// Builds a Rust crate with a deterministic configuration: `--locked`
/// against an existing `Cargo.lock`, an isolated `CARGO_HOME` under the
/// workspace, `CARGO_INCREMENTAL=0`, `SOURCE_DATE_EPOCH=0`, and
/// `-C embed-bitcode=no`.
pub struct CargoBuildAction;

impl Action for CargoBuildAction {
    fn name(&self) -> &'static str {
        "cargo_build"
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps {
            install_time: vec!["rust".into()],
            runtime: Vec::new(),
            eval_time: Vec::new(),
        }
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let mut report = PreflightReport::ok();
        if params::get_str(params_map, "source_dir").is_none() {
            report
                .errors
                .push("cargo_build requires the 'source_dir' parameter".into());
        }
        match params::get_string_slice(params_map, "executables") {
            Some(executables) if !executables.is_empty() => {
                if let Err(err) = params::ensure_safe_executable_names(&executables, "cargo_build")
                {
                    report.errors.push(err.to_string());
                }
            }
            _ => report.errors.push(
                "cargo_build requires the 'executables' parameter with at least one entry".into(),
            ),
        }
        if let Some(target) = params::get_str(params_map, "target") {
            if !is_valid_target_triple(target) {
                report
                    .errors
                    .push(format!("cargo_build: invalid target triple {target:?}"));
            }
        }
        if let Some(features) = params::get_string_slice(params_map, "features") {
            for feature in &features {
                if !is_valid_feature_name(feature) {
                    report
                        .errors
                        .push(format!("cargo_build: invalid feature name {feature:?}"));
                }
            }
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let report = self.preflight(params_map);
        if !report.is_ok() {
            bail!("{}", report.errors.join("; "));
        }
        let source_dir = params::require_str(params_map, "source_dir", "cargo_build")?;
        let source_dir = if Path::new(source_dir).is_absolute() {
            PathBuf::from(source_dir)
        } else {
            ctx.work_dir.join(source_dir)
        };
        if !source_dir.join("Cargo.toml").exists() {
            bail!("Cargo.toml not found in {}", source_dir.display());
        }

        let executables = params::require_string_slice(params_map, "executables", "cargo_build")?;
        let target = params::get_string(params_map, "target");
        let features = params::get_string_slice(params_map, "features").unwrap_or_default();
        let locked = params::get_bool(params_map, "locked").unwrap_or(true);

        let cargo = find_cargo(ctx)?;
        let mut args = vec!["build".to_string(), "--release".to_string()];
        if locked {
            if !source_dir.join("Cargo.lock").exists() {
                bail!(
                    "locked build requested but Cargo.lock not found in {}",
                    source_dir.display()
                );
            }
            args.push("--locked".to_string());
        }
        if let Some(target) = &target {
            args.push("--target".to_string());
            args.push(target.clone());
        }
        for feature in &features {
            args.push("--features".to_string());
            args.push(feature.clone());
        }
        debug!(cargo = %cargo.display(), args = ?args, "cargo_build: building");

        let envs = deterministic_cargo_env(&cargo, &ctx.work_dir);
        ctx.cancel.ensure_active()?;
        let output = run_command(&cargo.to_string_lossy(), &args, &envs, &source_dir)?;
        if output.code != 0 {
            bail!("cargo build failed: {}", output.stderr.trim());
        }

        let mut release_dir = source_dir.join("target");
        if let Some(target) = &target {
            release_dir = release_dir.join(target);
        }
        let release_dir = release_dir.join("release");

        let bin_dir = ctx.install_dir.join("bin");
        for exe in &executables {
            let built = release_dir.join(exe);
            if !built.exists() {
                bail!("expected executable {exe} not found at {}", built.display());
            }
            copy_binary(&built, &bin_dir.join(exe))?;
        }
        Ok(())
    }
}

fn find_cargo(ctx: &ExecutionContext) -> Result<PathBuf> {
    for dir in &ctx.exec_paths {
        let candidate = dir.join("cargo");
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    if let Some(peer) = ctx.find_peer_binary("rust", "cargo") {
        return Ok(peer);
    }
    which::which("cargo").context("cargo not found: install rust first (tsuku install rust)")
}

/// Environment for a reproducible release build. `PIP_USER`-style inherited
/// state is dropped by pinning every sensitive variable explicitly.
fn deterministic_cargo_env(cargo: &Path, work_dir: &Path) -> Vec<(String, String)> {
    let cargo_home = work_dir.join(".cargo-home");
    let mut rustflags = std::env::var("RUSTFLAGS").unwrap_or_default();
    if !rustflags.is_empty() {
        rustflags.push(' ');
    }
    rustflags.push_str("-C embed-bitcode=no");

    let mut path = std::env::var("PATH").unwrap_or_default();
    if let Some(cargo_dir) = cargo.parent() {
        path = format!("{}:{path}", cargo_dir.display());
    }

    vec![
        ("CARGO_HOME".to_string(), cargo_home.display().to_string()),
        ("CARGO_INCREMENTAL".to_string(), "0".to_string()),
        ("SOURCE_DATE_EPOCH".to_string(), "0".to_string()),
        ("RUSTFLAGS".to_string(), rustflags),
        ("PATH".to_string(), path),
    ]
}

/// Target triples are `<arch>-<vendor>-<sys>[-<abi>]`, alphanumeric with
/// hyphens and underscores only.
fn is_valid_target_triple(target: &str) -> bool {
    if target.is_empty() || target.len() > 100 {
        return false;
    }
    if target.split('-').count() < 3 {
        return false;
    }
    target
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

/// Feature names may be namespaced (`dep/feature`).
fn is_valid_feature_name(feature: &str) -> bool {
    if feature.is_empty() || feature.len() > 100 {
        return false;
    }
    feature
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/'))
}
