use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use super::{params, Action, ActionDeps, EvalContext, ExecutionContext, PreflightReport, PrimitiveStep};
use crate::process::run_command;
use tsuku_domain::Params;

/// npm package names: optionally scoped, no shell metacharacters.
pub(super) fn is_valid_npm_package(name: &str) -> bool {
    if name.is_empty() || name.len() > 214 {
        return false;
    }
    let rest = match name.strip_prefix('@') {
        Some(scoped) => {
            let Some((scope, pkg)) = scoped.split_once('/') else {
                return false;
            };
            if scope.is_empty() || pkg.is_empty() {
                return false;
            }
            pkg
        }
        None => name,
    };
    !rest.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '/'))
}

/// Whether version metadata indicates native addons (a `gypfile` or an
/// install script), which makes the install platform-sensitive.
pub(super) fn detect_native_addons(version_doc: &Value) -> bool {
    if version_doc
        .get("gypfile")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return true;
    }
    version_doc
        .get("scripts")
        .and_then(Value::as_object)
        .is_some_and(|scripts| scripts.contains_key("install") || scripts.contains_key("preinstall"))
}

/// Install an npm package at plan-resolved version. Decomposes to the
/// `npm_exec` primitive after consulting the registry for native-addon
/// markers.
pub struct NpmInstallAction;

impl Action for NpmInstallAction {
    fn name(&self) -> &'static str {
        "npm_install"
    }

    fn is_decomposable(&self) -> bool {
        true
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps {
            install_time: vec!["nodejs".into()],
            runtime: vec!["nodejs".into()],
            eval_time: vec!["nodejs".into()],
        }
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        match params::get_str(params_map, "package") {
            None => PreflightReport::error("npm_install requires the 'package' parameter"),
            Some(package) if !is_valid_npm_package(package) => {
                PreflightReport::error(format!("npm_install: invalid package name {package:?}"))
            }
            Some(_) => PreflightReport::ok(),
        }
    }

    fn execute(&self, _ctx: &ExecutionContext, _params: &Params) -> Result<()> {
        bail!("composite action 'npm_install' must be decomposed into primitives before execution")
    }

    fn decompose(&self, ctx: &EvalContext, params_map: &Params) -> Result<Vec<PrimitiveStep>> {
        let report = self.preflight(params_map);
        if !report.is_ok() {
            bail!("{}", report.errors.join("; "));
        }
        let package = params::require_str(params_map, "package", "npm_install")?;
        let executables = params::get_string_slice(params_map, "executables")
            .unwrap_or_else(|| vec![default_binary_name(package)]);
        params::ensure_safe_executable_names(&executables, "npm_install")?;

        let mut has_native_addons = false;
        let url = format!("{}/{}/{}", ctx.resolver.npm_base, package, ctx.version);
        match ctx.resolver.get_json("npm", &url) {
            Ok(doc) => has_native_addons = detect_native_addons(&doc),
            Err(err) => {
                warn!(package, error = %err, "npm_install: could not read version metadata");
            }
        }

        let mut step = Params::new();
        step.insert("package".into(), Value::String(package.to_string()));
        step.insert("version".into(), Value::String(ctx.version.clone()));
        step.insert(
            "executables".into(),
            Value::Array(executables.into_iter().map(Value::String).collect()),
        );
        if has_native_addons {
            step.insert("has_native_addons".into(), Value::Bool(true));
        }
        Ok(vec![PrimitiveStep::new("npm_exec", step)])
    }
}

/// The bin name for a scoped package drops the scope.
fn default_binary_name(package: &str) -> String {
    package
        .rsplit('/')
        .next()
        .unwrap_or(package)
        .to_string()
}

/// Ecosystem primitive: installs an exact package version with npm into an
/// isolated prefix under the install dir and links its executables into
/// `bin/`.
pub struct NpmExecAction;

impl Action for NpmExecAction {
    fn name(&self) -> &'static str {
        "npm_exec"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps {
            install_time: vec!["nodejs".into()],
            runtime: vec!["nodejs".into()],
            eval_time: Vec::new(),
        }
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let mut report = PreflightReport::ok();
        match params::get_str(params_map, "package") {
            None => report
                .errors
                .push("npm_exec requires the 'package' parameter".into()),
            Some(package) if !is_valid_npm_package(package) => report
                .errors
                .push(format!("npm_exec: invalid package name {package:?}")),
            Some(_) => {}
        }
        if params::get_str(params_map, "version").is_none() {
            report
                .errors
                .push("npm_exec requires the 'version' parameter".into());
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let report = self.preflight(params_map);
        if !report.is_ok() {
            bail!("{}", report.errors.join("; "));
        }
        let package = params::require_str(params_map, "package", "npm_exec")?;
        let version = params::require_str(params_map, "version", "npm_exec")?;
        let executables = params::get_string_slice(params_map, "executables")
            .unwrap_or_else(|| vec![default_binary_name(package)]);
        if params::get_bool(params_map, "has_native_addons").unwrap_or(false) {
            warn!(package, "npm_exec: package contains native addons; install is platform-specific");
        }

        let npm = find_npm(ctx)?;
        let prefix = ctx.install_dir.join("lib").join(default_binary_name(package));
        fs::create_dir_all(&prefix)?;

        ctx.cancel.ensure_active()?;
        debug!(package, version, "npm_exec: installing");
        let output = run_command(
            &npm.to_string_lossy(),
            &[
                "install".to_string(),
                "--global".to_string(),
                "--prefix".to_string(),
                prefix.display().to_string(),
                "--no-fund".to_string(),
                "--no-audit".to_string(),
                format!("{package}@{version}"),
            ],
            &[("PATH".to_string(), ctx.path_env())],
            &ctx.work_dir,
        )?;
        if output.code != 0 {
            bail!("npm install failed: {}", output.stderr.trim());
        }

        let npm_bin = prefix.join("bin");
        let bin_dir = ctx.install_dir.join("bin");
        fs::create_dir_all(&bin_dir)?;
        for exe in &executables {
            let source = npm_bin.join(exe);
            if !source.exists() {
                bail!("expected executable {exe} not found at {}", source.display());
            }
            let dest = bin_dir.join(exe);
            let _ = fs::remove_file(&dest);
            let relative = PathBuf::from("..")
                .join("lib")
                .join(default_binary_name(package))
                .join("bin")
                .join(exe);
            #[cfg(unix)]
            std::os::unix::fs::symlink(&relative, &dest)
                .with_context(|| format!("failed to link {exe}"))?;
            #[cfg(not(unix))]
            fs::copy(&source, &dest).with_context(|| format!("failed to copy {exe}"))?;
        }
        Ok(())
    }
}

fn find_npm(ctx: &ExecutionContext) -> Result<PathBuf> {
    for dir in &ctx.exec_paths {
        let candidate = dir.join("npm");
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    if let Some(peer) = ctx.find_peer_binary("nodejs", "npm") {
        return Ok(peer);
    }
    which::which("npm").context("npm not found: install nodejs first (tsuku install nodejs)")
}
