use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use walkdir::WalkDir;

use super::{copy_binary, params, Action, ExecutionContext, PreflightReport};
use crate::template::expand_vars;
use tsuku_domain::Params;

const SEARCH_DEPTH: usize = 4;

/// Copies built or extracted executables into `install_dir/bin`, where the
/// promoter expects them. Entries are bare names, searched for in the
/// workspace, or explicit workspace-relative paths.
pub struct InstallBinariesAction;

impl Action for InstallBinariesAction {
    fn name(&self) -> &'static str {
        "install_binaries"
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let Some(binaries) = params::get_string_slice(params_map, "binaries") else {
            return PreflightReport::error(
                "install_binaries requires the 'binaries' parameter with at least one entry",
            );
        };
        let mut report = PreflightReport::ok();
        for binary in &binaries {
            let acceptable = if binary.contains('/') {
                params::is_safe_relative_path(binary)
            } else {
                params::is_safe_executable_name(binary)
            };
            if !acceptable {
                report
                    .errors
                    .push(format!("install_binaries: invalid entry {binary:?}"));
            }
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let vars = ctx.vars();
        let binaries = params::require_string_slice(params_map, "binaries", "install_binaries")?;
        let bin_dir = ctx.install_dir.join("bin");

        for entry in binaries {
            let entry = expand_vars(&entry, &vars);
            let source = locate(&ctx.work_dir, &entry)?;
            let base = source
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&entry));
            copy_binary(&source, &bin_dir.join(base))?;
        }
        Ok(())
    }
}

/// An explicit relative path is taken as-is; a bare name is searched for in
/// the workspace, shallowest match first.
fn locate(work_dir: &Path, entry: &str) -> Result<PathBuf> {
    if entry.contains('/') {
        if !params::is_safe_relative_path(entry) {
            bail!("install_binaries: invalid entry {entry:?}");
        }
        let direct = work_dir.join(entry);
        if direct.is_file() {
            return Ok(direct);
        }
        bail!(
            "install_binaries: {} not found in the workspace",
            direct.display()
        );
    }
    if !params::is_safe_executable_name(entry) {
        bail!("install_binaries: invalid entry {entry:?}");
    }
    let mut matches: Vec<PathBuf> = WalkDir::new(work_dir)
        .max_depth(SEARCH_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str() == Some(entry))
        .map(walkdir::DirEntry::into_path)
        .collect();
    matches.sort_by_key(|p| p.components().count());
    matches.into_iter().next().ok_or_else(|| {
        anyhow::anyhow!("install_binaries: executable {entry:?} not found in the workspace")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use serde_json::json;
    use std::fs;

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
    fn finds_binaries_in_extracted_subdirectories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("tool-1.0.0/bin");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(nested.join("tool-a"), b"#!/bin/sh\n").expect("write");

        let params = json!({ "binaries": ["tool-a"] }).as_object().cloned().unwrap();
        InstallBinariesAction
            .execute(&ctx(dir.path()), &params)
            .expect("install");

        let installed = dir.path().join(".install/bin/tool-a");
        assert!(installed.is_file());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&installed).expect("meta").permissions().mode();
            assert_eq!(mode & 0o111, 0o111, "binary must be executable");
        }
    }

    #[test]
    fn accepts_explicit_relative_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("out")).expect("mkdir");
        fs::write(dir.path().join("out/helper"), b"x").expect("write");

        let params = json!({ "binaries": ["out/helper"] })
            .as_object()
            .cloned()
            .unwrap();
        InstallBinariesAction
            .execute(&ctx(dir.path()), &params)
            .expect("install");
        assert!(dir.path().join(".install/bin/helper").is_file());
    }

    #[test]
    fn missing_binary_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let params = json!({ "binaries": ["ghost"] }).as_object().cloned().unwrap();
        assert!(InstallBinariesAction
            .execute(&ctx(dir.path()), &params)
            .is_err());
    }

    #[test]
    fn preflight_rejects_traversal() {
        for bad in ["../evil", "/abs/path", ""] {
            let params = json!({ "binaries": [bad] }).as_object().cloned().unwrap();
            assert!(
                !InstallBinariesAction.preflight(&params).is_ok(),
                "expected {bad:?} rejected"
            );
        }
    }
}
