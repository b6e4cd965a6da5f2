use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use super::{params, Action, ActionDeps, ExecutionContext, PreflightReport};
use crate::process::run_command;
use tsuku_domain::Params;

/// Installs Python packages from a locked `requirements.txt` with hash
/// verification into an isolated, relocatable venv.
///
/// Determinism comes from lockfile enforcement and a pinned build
/// environment, but bytecode generation and platform wheel selection leave
/// residual variance, so the action stays non-deterministic.
pub struct PipExecAction;

impl Action for PipExecAction {
    fn name(&self) -> &'static str {
        "pip_exec"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps {
            install_time: vec!["python-standalone".into()],
            runtime: vec!["python-standalone".into()],
            eval_time: Vec::new(),
        }
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let mut report = PreflightReport::ok();
        for key in ["package", "locked_requirements"] {
            if params::get_str(params_map, key).is_none() {
                report
                    .errors
                    .push(format!("pip_exec requires the '{key}' parameter"));
            }
        }
        match params::get_string_slice(params_map, "executables") {
            Some(executables) if !executables.is_empty() => {
                if let Err(err) = params::ensure_safe_executable_names(&executables, "pip_exec") {
                    report.errors.push(err.to_string());
                }
            }
            _ => report.errors.push(
                "pip_exec requires the 'executables' parameter with at least one entry".into(),
            ),
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let report = self.preflight(params_map);
        if !report.is_ok() {
            bail!("{}", report.errors.join("; "));
        }
        let package = params::require_str(params_map, "package", "pip_exec")?;
        let executables = params::require_string_slice(params_map, "executables", "pip_exec")?;
        let locked_requirements =
            params::require_str(params_map, "locked_requirements", "pip_exec")?;
        let expected_python = params::get_string(params_map, "python_version");

        let python = find_python(ctx).context(
            "python not found: install python-standalone first (tsuku install python-standalone)",
        )?;
        debug!(python = %python.display(), package, "pip_exec: installing");

        if let Some(expected) = expected_python.filter(|v| !v.is_empty()) {
            match python_version(&python) {
                Ok(actual) if actual.starts_with(&expected) => {}
                Ok(actual) => {
                    warn!(%expected, %actual, "pip_exec: python version mismatch");
                }
                Err(err) => return Err(err.context("failed to determine Python version")),
            }
        }

        // Isolated venv under the install dir so promotion carries it.
        let venv_dir = ctx.install_dir.join("venvs").join(package);
        fs::create_dir_all(venv_dir.parent().context("venv parent")?)?;
        ctx.cancel.ensure_active()?;
        let output = run_command(
            &python.to_string_lossy(),
            &[
                "-m".to_string(),
                "venv".to_string(),
                venv_dir.display().to_string(),
            ],
            &[],
            &ctx.work_dir,
        )?;
        if output.code != 0 {
            bail!("failed to create venv: {}", output.stderr.trim());
        }

        let requirements_path = venv_dir.join("requirements.txt");
        fs::write(&requirements_path, locked_requirements)?;
        debug!(
            packages = count_requirement_lines(locked_requirements),
            "pip_exec: installing locked requirements with hash verification"
        );

        // PIP_USER conflicts with venv installs and must never leak in;
        // PYTHONHASHSEED pins bytecode generation.
        let pip = venv_dir.join("bin").join("pip");
        let envs = vec![
            ("PIP_USER".to_string(), String::new()),
            ("PYTHONHASHSEED".to_string(), "0".to_string()),
        ];
        ctx.cancel.ensure_active()?;
        let output = run_command(
            &pip.to_string_lossy(),
            &[
                "install".to_string(),
                "--require-hashes".to_string(),
                "--no-deps".to_string(),
                "--only-binary".to_string(),
                ":all:".to_string(),
                "--disable-pip-version-check".to_string(),
                "-r".to_string(),
                requirements_path.display().to_string(),
            ],
            &envs,
            &venv_dir,
        )?;
        if output.code != 0 {
            bail!("pip install failed: {}", output.stderr.trim());
        }

        let venv_bin = venv_dir.join("bin");
        for exe in &executables {
            let path = venv_bin.join(exe);
            if !path.exists() {
                bail!("expected executable {exe} not found at {}", path.display());
            }
        }

        relink_venv_python(&venv_bin, &python)?;
        for exe in &executables {
            if let Err(err) = fix_python_shebang(&venv_bin.join(exe)) {
                warn!(%exe, error = %err, "pip_exec: failed to rewrite shebang");
            }
        }

        // Relative symlinks into bin/ where the promoter looks.
        let bin_dir = ctx.install_dir.join("bin");
        fs::create_dir_all(&bin_dir)?;
        for exe in &executables {
            let source = PathBuf::from("..").join("venvs").join(package).join("bin").join(exe);
            let dest = bin_dir.join(exe);
            let _ = fs::remove_file(&dest);
            #[cfg(unix)]
            std::os::unix::fs::symlink(&source, &dest)
                .with_context(|| format!("failed to link {exe}"))?;
            #[cfg(not(unix))]
            fs::copy(venv_bin.join(exe), &dest)
                .with_context(|| format!("failed to copy {exe}"))?;
        }
        Ok(())
    }
}

fn find_python(ctx: &ExecutionContext) -> Option<PathBuf> {
    for dir in &ctx.exec_paths {
        let candidate = dir.join("python3");
        if candidate.exists() {
            return Some(candidate);
        }
    }
    if let Some(peer) = ctx.find_peer_binary("python-standalone", "python3") {
        return Some(peer);
    }
    which::which("python3").ok()
}

fn python_version(python: &Path) -> Result<String> {
    let output = run_command(
        &python.to_string_lossy(),
        &["--version".to_string()],
        &[],
        Path::new("."),
    )?;
    // Output is "Python 3.11.7".
    let combined = if output.stdout.trim().is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    combined
        .trim()
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
        .with_context(|| format!("unexpected Python version output: {}", combined.trim()))
}

/// The venv's `python3` symlink points at an absolute interpreter path;
/// rewrite it to a relative one so the tree survives promotion.
fn relink_venv_python(venv_bin: &Path, python: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let link = venv_bin.join("python3");
        if let Ok(target) = fs::read_link(&link) {
            if target.is_absolute() {
                let relative = pathdiff_relative(venv_bin, python);
                fs::remove_file(&link)?;
                if std::os::unix::fs::symlink(&relative, &link).is_err() {
                    // Fall back to the original absolute target.
                    let _ = std::os::unix::fs::symlink(python, &link);
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (venv_bin, python);
    }
    Ok(())
}

/// Best-effort relative path from `base` to `target` built from shared
/// prefix components.
fn pathdiff_relative(base: &Path, target: &Path) -> PathBuf {
    let base_components: Vec<_> = base.components().collect();
    let target_components: Vec<_> = target.components().collect();
    let mut shared = 0;
    while shared < base_components.len()
        && shared < target_components.len()
        && base_components[shared] == target_components[shared]
    {
        shared += 1;
    }
    let mut out = PathBuf::new();
    for _ in shared..base_components.len() {
        out.push("..");
    }
    for component in &target_components[shared..] {
        out.push(component);
    }
    out
}

/// Entry-point scripts carry absolute shebangs into the staging dir, which
/// break after promotion. Rewrite to exec the sibling `python3`.
fn fix_python_shebang(script_path: &Path) -> Result<()> {
    let content = fs::read(script_path)?;
    if !content.starts_with(b"#!") {
        return Ok(());
    }
    let Some(newline) = content.iter().position(|&b| b == b'\n') else {
        return Ok(());
    };
    let shebang = String::from_utf8_lossy(&content[..newline]);
    if !shebang.contains("python") {
        return Ok(());
    }
    let mut rewritten =
        b"#!/bin/sh\nexec \"$(dirname \"$0\")/python3\" \"$0\" \"$@\"".to_vec();
    rewritten.extend_from_slice(&content[newline..]);
    fs::write(script_path, rewritten)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(script_path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Counts pinned package lines in a requirements file.
fn count_requirement_lines(requirements: &str) -> usize {
    requirements
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("--"))
        .filter(|line| line.contains("==") || line.contains(" @ "))
        .count()
}
