use anyhow::{bail, Result};
use serde_json::Value;

use super::github_archive::{is_valid_repo_slug, release_asset_url};
use super::{params, Action, EvalContext, ExecutionContext, PreflightReport, PrimitiveStep};
use crate::template::{apply_arch_mapping, apply_os_mapping, expand_vars};
use tsuku_domain::Params;

/// Fetch a single release asset (a bare binary, not an archive) and mark it
/// executable. Decomposes to `download_file` + `chmod`.
pub struct GithubFileAction;

impl Action for GithubFileAction {
    fn name(&self) -> &'static str {
        "github_file"
    }

    fn is_decomposable(&self) -> bool {
        true
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let mut report = PreflightReport::ok();
        match params::get_str(params_map, "repo") {
            None => report
                .errors
                .push("github_file requires the 'repo' parameter".into()),
            Some(repo) if !is_valid_repo_slug(repo) => report
                .errors
                .push(format!("github_file: invalid repo slug {repo:?}")),
            Some(_) => {}
        }
        if params::get_str(params_map, "file").is_none() {
            report
                .errors
                .push("github_file requires the 'file' parameter".into());
        }
        if let Some(dest) = params::get_str(params_map, "dest") {
            if !params::is_safe_executable_name(dest) {
                report
                    .errors
                    .push(format!("github_file: invalid dest name {dest:?}"));
            }
        }
        report
    }

    fn execute(&self, _ctx: &ExecutionContext, _params: &Params) -> Result<()> {
        bail!("composite action 'github_file' must be decomposed into primitives before execution")
    }

    fn decompose(&self, ctx: &EvalContext, params_map: &Params) -> Result<Vec<PrimitiveStep>> {
        let report = self.preflight(params_map);
        if !report.is_ok() {
            bail!("{}", report.errors.join("; "));
        }
        let repo = params::require_str(params_map, "repo", "github_file")?;
        let file = params::require_str(params_map, "file", "github_file")?;

        let mut vars = ctx.vars();
        apply_os_mapping(&mut vars, params_map);
        apply_arch_mapping(&mut vars, params_map);
        let asset = expand_vars(file, &vars);
        if !params::is_safe_executable_name(&asset) {
            bail!("github_file: asset name {asset:?} is not a plain file name");
        }
        let dest = params::get_string(params_map, "dest").unwrap_or_else(|| asset.clone());

        let tag = if ctx.version_tag.is_empty() {
            format!("v{}", ctx.version)
        } else {
            ctx.version_tag.clone()
        };
        let url = release_asset_url(repo, &tag, &asset);

        let mut download = Params::new();
        download.insert("url".into(), Value::String(url));
        download.insert("dest".into(), Value::String(dest.clone()));
        if let Some(checksum) = params::get_str(params_map, "checksum") {
            download.insert("checksum".into(), Value::String(checksum.to_string()));
        }

        let mut chmod = Params::new();
        chmod.insert("path".into(), Value::String(dest));

        Ok(vec![
            PrimitiveStep::new("download_file", download),
            PrimitiveStep::new("chmod", chmod),
        ])
    }
}
