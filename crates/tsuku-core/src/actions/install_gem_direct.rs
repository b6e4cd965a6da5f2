use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::debug;

use super::{params, Action, ActionDeps, ExecutionContext, PreflightReport};
use crate::process::run_command;
use tsuku_domain::Params;

/// Installs a single gem with `gem install` directly, for bundler
/// self-installation where `bundle install` cannot be used. Executables
/// land in `install_dir/bin` as relative symlinks into the gem home so the
/// tree survives promotion.
pub struct InstallGemDirectAction;

impl Action for InstallGemDirectAction {
    fn name(&self) -> &'static str {
        "install_gem_direct"
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
        let mut report = PreflightReport::ok();
        for key in ["gem", "version"] {
            match params::get_str(params_map, key) {
                None => report
                    .errors
                    .push(format!("install_gem_direct requires the '{key}' parameter")),
                Some(value) if params::has_shell_metacharacters(value) => report
                    .errors
                    .push(format!("install_gem_direct: {key} {value:?} contains shell metacharacters")),
                Some(_) => {}
            }
        }
        match params::get_string_slice(params_map, "executables") {
            Some(executables) if !executables.is_empty() => {
                if let Err(err) =
                    params::ensure_safe_executable_names(&executables, "install_gem_direct")
                {
                    report.errors.push(err.to_string());
                }
            }
            _ => report.errors.push(
                "install_gem_direct requires the 'executables' parameter with at least one entry"
                    .into(),
            ),
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let report = self.preflight(params_map);
        if !report.is_ok() {
            bail!("{}", report.errors.join("; "));
        }
        let gem_name = params::require_str(params_map, "gem", "install_gem_direct")?;
        let version = params::require_str(params_map, "version", "install_gem_direct")?;
        let executables =
            params::require_string_slice(params_map, "executables", "install_gem_direct")?;

        let gem = find_gem(ctx)?;
        let gem_home = ctx.install_dir.join(".gem");
        fs::create_dir_all(&gem_home)?;

        ctx.cancel.ensure_active()?;
        debug!(gem_name, version, "install_gem_direct: running gem install");
        let envs = vec![
            ("GEM_HOME".to_string(), gem_home.display().to_string()),
            ("GEM_PATH".to_string(), gem_home.display().to_string()),
            ("PATH".to_string(), ctx.path_env()),
        ];
        let output = run_command(
            &gem.to_string_lossy(),
            &[
                "install".to_string(),
                gem_name.to_string(),
                "--version".to_string(),
                version.to_string(),
                "--install-dir".to_string(),
                gem_home.display().to_string(),
                "--no-document".to_string(),
            ],
            &envs,
            &ctx.work_dir,
        )?;
        if output.code != 0 {
            bail!("gem install failed: {}", output.stderr.trim());
        }

        let gem_bin = gem_home.join("bin");
        if !gem_bin.is_dir() {
            bail!("gem bin directory not found at {}", gem_bin.display());
        }

        let bin_dir = ctx.install_dir.join("bin");
        fs::create_dir_all(&bin_dir)?;
        for exe in &executables {
            let source = gem_bin.join(exe);
            if !source.exists() {
                bail!("expected executable {exe} not found at {}", source.display());
            }
            let dest = bin_dir.join(exe);
            let _ = fs::remove_file(&dest);
            let relative = PathBuf::from("..").join(".gem").join("bin").join(exe);
            #[cfg(unix)]
            std::os::unix::fs::symlink(&relative, &dest)
                .with_context(|| format!("failed to link {exe}"))?;
            #[cfg(not(unix))]
            fs::copy(&source, &dest).with_context(|| format!("failed to copy {exe}"))?;
        }
        Ok(())
    }
}

fn find_gem(ctx: &ExecutionContext) -> Result<PathBuf> {
    for dir in &ctx.exec_paths {
        let candidate = dir.join("gem");
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    if let Some(peer) = ctx.find_peer_binary("ruby", "gem") {
        return Ok(peer);
    }
    which::which("gem").context("gem command not found: install ruby first (tsuku install ruby)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preflight_validates_gem_version_and_executables() {
        let action = InstallGemDirectAction;
        assert!(!action.preflight(&Params::new()).is_ok());

        let injection = json!({
            "gem": "bundler; rm -rf /",
            "version": "2.5.9",
            "executables": ["bundle"],
        })
        .as_object()
        .cloned()
        .unwrap();
        assert!(!action.preflight(&injection).is_ok());

        let ok = json!({
            "gem": "bundler",
            "version": "2.5.9",
            "executables": ["bundle", "bundler"],
        })
        .as_object()
        .cloned()
        .unwrap();
        assert!(action.preflight(&ok).is_ok());
    }

    #[test]
    fn declares_ruby_dependency() {
        let deps = InstallGemDirectAction.dependencies();
        assert_eq!(deps.install_time, vec!["ruby"]);
        assert_eq!(deps.runtime, vec!["ruby"]);
    }
}
