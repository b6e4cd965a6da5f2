use anyhow::{bail, Result};
use tracing::debug;

use super::{params, Action, ExecutionContext, PreflightReport};
use crate::config;
use crate::process::run_command;
use crate::template::expand_vars;
use tsuku_domain::Params;

/// Runs a free-form shell command in the workspace. Deliberately
/// unrestricted, which is why it is neither evaluable nor deterministic:
/// plans containing it warn at generation time and lose their
/// deterministic bit.
pub struct RunShellAction;

impl Action for RunShellAction {
    fn name(&self) -> &'static str {
        "run_shell"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn is_evaluable(&self) -> bool {
        false
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        if params::get_str(params_map, "command").is_none() {
            return PreflightReport::error("run_shell requires the 'command' parameter");
        }
        PreflightReport::ok()
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let vars = ctx.vars();
        let command = params::require_str(params_map, "command", "run_shell")?;
        let command = expand_vars(command, &vars);

        let cwd = match params::get_str(params_map, "dir") {
            Some(dir) => {
                if !params::is_safe_relative_path(dir) {
                    bail!("run_shell: invalid dir path {dir:?}");
                }
                ctx.work_dir.join(dir)
            }
            None => ctx.work_dir.clone(),
        };

        ctx.cancel.ensure_active()?;
        debug!(%command, "run_shell: executing");
        let envs = vec![
            ("PATH".to_string(), ctx.path_env()),
            (
                "TSUKU_INSTALL_DIR".to_string(),
                ctx.install_dir.display().to_string(),
            ),
        ];
        let output = run_command(
            "/bin/sh",
            &["-c".to_string(), command.clone()],
            &envs,
            &cwd,
        )?;
        if config::debug_enabled() && !output.stdout.is_empty() {
            eprintln!("{}", output.stdout);
        }
        if output.code != 0 {
            bail!(
                "run_shell command exited with status {}: {}",
                output.code,
                output.stderr.trim()
            );
        }
        Ok(())
    }
}
