use std::fs;

use anyhow::{bail, Context, Result};
use tracing::debug;

use super::{params, Action, ActionDeps, ExecutionContext, PreflightReport};
use crate::process::run_command;
use tsuku_domain::Params;

/// Realizes a Nix flake output and copies its `bin/` into the install dir.
/// Linux-only. Flake references and store paths are validated against a
/// strict allowlist grammar before anything reaches the nix CLI.
pub struct NixRealizeAction;

impl Action for NixRealizeAction {
    fn name(&self) -> &'static str {
        "nix_realize"
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps {
            install_time: vec!["nix".into()],
            runtime: Vec::new(),
            eval_time: Vec::new(),
        }
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let mut report = PreflightReport::ok();
        match params::get_str(params_map, "flake_ref") {
            None => report
                .errors
                .push("nix_realize requires the 'flake_ref' parameter".into()),
            Some(flake_ref) if !is_valid_flake_ref(flake_ref) => report
                .errors
                .push(format!("nix_realize: invalid flake reference {flake_ref:?}")),
            Some(_) => {}
        }
        if let Some(store_path) = params::get_str(params_map, "store_path") {
            if !is_valid_store_path(store_path) {
                report
                    .errors
                    .push(format!("nix_realize: invalid store path {store_path:?}"));
            }
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        if !cfg!(target_os = "linux") {
            bail!("nix_realize is only supported on Linux");
        }
        let report = self.preflight(params_map);
        if !report.is_ok() {
            bail!("{}", report.errors.join("; "));
        }
        let flake_ref = params::require_str(params_map, "flake_ref", "nix_realize")?;
        let nix = which::which("nix")
            .context("nix not found: install nix first (tsuku install nix-portable)")?;

        let out_link = ctx.work_dir.join("nix-result");
        ctx.cancel.ensure_active()?;
        debug!(flake_ref, "nix_realize: building flake output");
        let output = run_command(
            &nix.to_string_lossy(),
            &[
                "--extra-experimental-features".to_string(),
                "nix-command flakes".to_string(),
                "build".to_string(),
                flake_ref.to_string(),
                "--out-link".to_string(),
                out_link.display().to_string(),
            ],
            &[],
            &ctx.work_dir,
        )?;
        if output.code != 0 {
            bail!("nix build failed: {}", output.stderr.trim());
        }

        let result_bin = out_link.join("bin");
        if !result_bin.is_dir() {
            bail!(
                "nix output has no bin directory at {}",
                result_bin.display()
            );
        }
        let bin_dir = ctx.install_dir.join("bin");
        fs::create_dir_all(&bin_dir)?;
        for entry in fs::read_dir(&result_bin)? {
            let entry = entry?;
            if entry.file_type()?.is_file() || entry.file_type()?.is_symlink() {
                super::copy_binary(&entry.path(), &bin_dir.join(entry.file_name()))?;
            }
        }
        Ok(())
    }
}

/// Flake refs are `<registry-or-url>#<attr>`: alphanumerics plus
/// `. _ - / : @ +` on the left, a dotted attribute path on the right.
fn is_valid_flake_ref(flake_ref: &str) -> bool {
    let Some((source, attr)) = flake_ref.split_once('#') else {
        return false;
    };
    if source.is_empty() || attr.is_empty() || flake_ref.contains("..") {
        return false;
    }
    let source_ok = source
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':' | '@' | '+'));
    let attr_ok = attr
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    source_ok && attr_ok
}

/// Store paths are `/nix/store/<32 base32 chars>-<name>`.
fn is_valid_store_path(store_path: &str) -> bool {
    let Some(rest) = store_path.strip_prefix("/nix/store/") else {
        return false;
    };
    let Some((hash, name)) = rest.split_once('-') else {
        return false;
    };
    hash.len() == 32
        && hash
            .chars()
            .all(|c| matches!(c, '0'..='9' | 'a'..='z') && !matches!(c, 'e' | 'o' | 'u' | 't'))
        && !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'))
}
