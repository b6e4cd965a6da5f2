use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::debug;

use super::{params, Action, ActionDeps, ExecutionContext, PreflightReport};
use crate::process::run_command;
use tsuku_domain::Params;

/// Epoch pinned for reproducible gem builds (1980-01-01, the zip floor).
const GEM_SOURCE_DATE_EPOCH: &str = "315619200";

/// Runs a bundler command against a frozen Gemfile: `BUNDLE_FROZEN=true`,
/// an install-dir `GEM_HOME`, and a pinned `SOURCE_DATE_EPOCH`. Both
/// `Gemfile` and `Gemfile.lock` must already be present.
pub struct GemExecAction;

impl Action for GemExecAction {
    fn name(&self) -> &'static str {
        "gem_exec"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps {
            install_time: vec!["ruby".into()],
            runtime: vec!["ruby".into()],
            eval_time: Vec::new(),
        }
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let Some(command) = params::get_str(params_map, "command") else {
            return PreflightReport::error("gem_exec requires the 'command' parameter");
        };
        let mut report = PreflightReport::ok();
        if params::has_shell_metacharacters(command) {
            report
                .errors
                .push(format!("gem_exec: command {command:?} contains shell metacharacters"));
        }
        if let Some(dir) = params::get_str(params_map, "source_dir") {
            if !params::is_safe_relative_path(dir) {
                report
                    .errors
                    .push(format!("gem_exec: invalid source_dir {dir:?}"));
            }
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let report = self.preflight(params_map);
        if !report.is_ok() {
            bail!("{}", report.errors.join("; "));
        }
        let command = params::require_str(params_map, "command", "gem_exec")?;
        let source_dir = match params::get_str(params_map, "source_dir") {
            Some(dir) => ctx.work_dir.join(dir),
            None => ctx.work_dir.clone(),
        };

        let gemfile = source_dir.join("Gemfile");
        let lockfile = source_dir.join("Gemfile.lock");
        if !gemfile.exists() {
            bail!("gem_exec: Gemfile not found at {}", gemfile.display());
        }
        if !lockfile.exists() {
            bail!("gem_exec: Gemfile.lock not found at {}", lockfile.display());
        }

        let bundle = find_bundle(ctx)?;
        let gem_home = ctx.install_dir.join(".gem");
        std::fs::create_dir_all(&gem_home)?;

        let mut words = command.split_whitespace();
        let first = words.next().context("gem_exec: empty command")?;
        if first != "install" && first != "exec" && first != "package" && first != "config" {
            bail!("gem_exec: unsupported bundle subcommand {first:?}");
        }
        let args: Vec<String> = std::iter::once(first.to_string())
            .chain(words.map(str::to_string))
            .collect();

        let envs = vec![
            ("BUNDLE_GEMFILE".to_string(), gemfile.display().to_string()),
            ("BUNDLE_FROZEN".to_string(), "true".to_string()),
            ("GEM_HOME".to_string(), gem_home.display().to_string()),
            ("GEM_PATH".to_string(), gem_home.display().to_string()),
            (
                "SOURCE_DATE_EPOCH".to_string(),
                GEM_SOURCE_DATE_EPOCH.to_string(),
            ),
            ("PATH".to_string(), ctx.path_env()),
        ];

        ctx.cancel.ensure_active()?;
        debug!(bundle = %bundle.display(), command, "gem_exec: running bundler");
        let output = run_command(&bundle.to_string_lossy(), &args, &envs, &source_dir)?;
        if output.code != 0 {
            bail!(
                "bundle {} failed with status {}: {}",
                args.join(" "),
                output.code,
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

fn find_bundle(ctx: &ExecutionContext) -> Result<PathBuf> {
    for dir in &ctx.exec_paths {
        let candidate = dir.join("bundle");
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    if let Some(peer) = ctx.find_peer_binary("ruby", "bundle") {
        return Ok(peer);
    }
    which::which("bundle").context("bundle not found: install ruby first (tsuku install ruby)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use serde_json::json;
    use std::path::Path;

    fn ctx(work: &Path) -> ExecutionContext<'static> {
        ExecutionContext {
            cancel: CancelToken::new(),
            work_dir: work.to_path_buf(),
            install_dir: work.join(".install"),
            tools_dir: work.join("tools"),
            tool_name: "demo".into(),
            version: "1.0.0".into(),
            version_tag: "v1.0.0".into(),
            exec_paths: Vec::new(),
            cache: None,
        }
    }

    #[test]
    fn preflight_rejects_shell_metacharacters() {
        let action = GemExecAction;
        assert!(!action.preflight(&Params::new()).is_ok());

        for bad in ["install; rm -rf /", "install `id`", "install $(x)", "install | tee"] {
            let params = json!({ "command": bad }).as_object().cloned().unwrap();
            assert!(!action.preflight(&params).is_ok(), "expected {bad:?} rejected");
        }

        let ok = json!({ "command": "install --jobs 4" }).as_object().cloned().unwrap();
        assert!(action.preflight(&ok).is_ok());
    }

    #[test]
    fn gemfile_and_lock_are_required() {
        let dir = tempfile::tempdir().expect("tempdir");
        let params = json!({ "command": "install" }).as_object().cloned().unwrap();

        let err = GemExecAction
            .execute(&ctx(dir.path()), &params)
            .expect_err("missing Gemfile");
        assert!(err.to_string().contains("Gemfile"));

        std::fs::write(dir.path().join("Gemfile"), "source 'https://rubygems.org'\n")
            .expect("write");
        let err = GemExecAction
            .execute(&ctx(dir.path()), &params)
            .expect_err("missing Gemfile.lock");
        assert!(err.to_string().contains("Gemfile.lock"));
    }
}
