use anyhow::{bail, Result};
use serde_json::Value;

use super::{params, Action, EvalContext, ExecutionContext, PreflightReport, PrimitiveStep};
use crate::template::{apply_arch_mapping, apply_os_mapping, expand_vars};
use tsuku_domain::Params;

/// Fetch a release archive from GitHub and unpack it. Decomposes to
/// `download_file` + `extract`; the plan generator pins the checksum.
pub struct GithubArchiveAction;

pub(super) fn is_valid_repo_slug(repo: &str) -> bool {
    let mut parts = repo.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) => {
            let ok = |s: &str| {
                !s.is_empty()
                    && s.chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            };
            ok(owner) && ok(name)
        }
        _ => false,
    }
}

/// Builds the release download URL for one asset:
/// `https://github.com/{repo}/releases/download/{tag}/{asset}`.
pub(super) fn release_asset_url(repo: &str, tag: &str, asset: &str) -> String {
    format!("https://github.com/{repo}/releases/download/{tag}/{asset}")
}

fn release_tag(ctx: &EvalContext) -> String {
    if ctx.version_tag.is_empty() {
        format!("v{}", ctx.version)
    } else {
        ctx.version_tag.clone()
    }
}

impl Action for GithubArchiveAction {
    fn name(&self) -> &'static str {
        "github_archive"
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
                .push("github_archive requires the 'repo' parameter".into()),
            Some(repo) if !is_valid_repo_slug(repo) => report
                .errors
                .push(format!("github_archive: invalid repo slug {repo:?}")),
            Some(_) => {}
        }
        if params::get_str(params_map, "asset_pattern").is_none()
            && params::get_str(params_map, "file").is_none()
        {
            report
                .errors
                .push("github_archive requires 'asset_pattern' or 'file'".into());
        }
        report
    }

    fn execute(&self, _ctx: &ExecutionContext, _params: &Params) -> Result<()> {
        bail!("composite action 'github_archive' must be decomposed into primitives before execution")
    }

    fn decompose(&self, ctx: &EvalContext, params_map: &Params) -> Result<Vec<PrimitiveStep>> {
        let report = self.preflight(params_map);
        if !report.is_ok() {
            bail!("{}", report.errors.join("; "));
        }
        let repo = params::require_str(params_map, "repo", "github_archive")?;
        let Some(pattern) = params::get_str(params_map, "asset_pattern")
            .or_else(|| params::get_str(params_map, "file"))
        else {
            bail!("github_archive requires 'asset_pattern' or 'file'");
        };

        let mut vars = ctx.vars();
        apply_os_mapping(&mut vars, params_map);
        apply_arch_mapping(&mut vars, params_map);
        let asset = expand_vars(pattern, &vars);
        if !params::is_safe_executable_name(&asset) {
            bail!("github_archive: asset name {asset:?} is not a plain file name");
        }
        let url = release_asset_url(repo, &release_tag(ctx), &asset);

        let mut download = Params::new();
        download.insert("url".into(), Value::String(url));
        download.insert("dest".into(), Value::String(asset.clone()));
        if let Some(checksum) = params::get_str(params_map, "checksum") {
            download.insert("checksum".into(), Value::String(checksum.to_string()));
        }

        let mut extract = Params::new();
        extract.insert("archive".into(), Value::String(asset));
        if let Some(strip) = params_map.get("strip_components") {
            extract.insert("strip_components".into(), strip.clone());
        }

        Ok(vec![
            PrimitiveStep::new("download_file", download),
            PrimitiveStep::new("extract", extract),
        ])
    }
}
