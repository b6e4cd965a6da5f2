use anyhow::{bail, Context, Result};

use super::{params, Action, ExecutionContext, PreflightReport};
use crate::template::expand_vars;
use tsuku_domain::Params;

/// Marks workspace files executable. `mode` is an octal string, default
/// `755`. No-op on platforms without unix permissions.
pub struct ChmodAction;

impl Action for ChmodAction {
    fn name(&self) -> &'static str {
        "chmod"
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let mut report = PreflightReport::ok();
        if let Some(mode) = params::get_str(params_map, "mode") {
            if u32::from_str_radix(mode, 8).is_err() {
                report
                    .errors
                    .push(format!("chmod: invalid octal mode {mode:?}"));
            }
        }
        if let Some(paths) = params::get_string_slice(params_map, "paths") {
            for path in &paths {
                if !params::is_safe_relative_path(path) {
                    report.errors.push(format!("chmod: invalid path {path:?}"));
                }
            }
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let vars = ctx.vars();
        let paths = params::get_string_slice(params_map, "paths")
            .or_else(|| params::get_string(params_map, "path").map(|p| vec![p]))
            .unwrap_or_default();
        if paths.is_empty() {
            bail!("chmod action requires the 'path' or 'paths' parameter");
        }
        let mode = params::get_str(params_map, "mode").unwrap_or("755");
        let mode = u32::from_str_radix(mode, 8)
            .with_context(|| format!("chmod: invalid octal mode {mode:?}"))?;

        for path in paths {
            let expanded = expand_vars(&path, &vars);
            if !params::is_safe_relative_path(&expanded) {
                bail!("chmod: invalid path {expanded:?}");
            }
            let full = ctx.work_dir.join(&expanded);
            if !full.exists() {
                bail!("chmod: {} does not exist", full.display());
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&full, std::fs::Permissions::from_mode(mode))
                    .with_context(|| format!("failed to chmod {}", full.display()))?;
            }
            #[cfg(not(unix))]
            {
                let _ = mode;
            }
        }
        Ok(())
    }
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

    #[cfg(unix)]
    #[test]
    fn sets_the_requested_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("tool"), b"#!/bin/sh\n").expect("write");

        let params = json!({ "path": "tool" }).as_object().cloned().unwrap();
        ChmodAction.execute(&ctx(dir.path()), &params).expect("chmod");

        let mode = std::fs::metadata(dir.path().join("tool"))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn rejects_traversal_and_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let escape = json!({ "path": "../etc/passwd" }).as_object().cloned().unwrap();
        assert!(ChmodAction.execute(&ctx(dir.path()), &escape).is_err());

        let missing = json!({ "path": "nope" }).as_object().cloned().unwrap();
        assert!(ChmodAction.execute(&ctx(dir.path()), &missing).is_err());
    }

    #[test]
    fn preflight_validates_mode() {
        let bad = json!({ "mode": "9z9" }).as_object().cloned().unwrap();
        assert!(!ChmodAction.preflight(&bad).is_ok());
        assert!(ChmodAction.preflight(&Params::new()).is_ok());
    }
}
