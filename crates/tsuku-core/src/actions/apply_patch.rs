use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::debug;

use super::{params, Action, ExecutionContext, PreflightReport};
use crate::net;
use crate::sanitize::sanitize_url;
use tsuku_domain::Params;

/// Applies a patch with the system `patch` tool. The patch comes from an
/// HTTPS URL or inline `data`, mutually exclusive.
pub struct ApplyPatchAction;

impl Action for ApplyPatchAction {
    fn name(&self) -> &'static str {
        "apply_patch"
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let mut report = PreflightReport::ok();
        let url = params::get_str(params_map, "url");
        let data = params::get_str(params_map, "data");
        match (url, data) {
            (None, None) => report
                .errors
                .push("apply_patch: either 'url' or 'data' is required".into()),
            (Some(_), Some(_)) => report
                .errors
                .push("apply_patch: cannot specify both 'url' and 'data'".into()),
            (Some(url), None) if !url.starts_with("https://") => report
                .errors
                .push(format!("apply_patch: url must use https, got {:?}", sanitize_url(url))),
            _ => {}
        }
        if let Some(strip) = params::get_i64(params_map, "strip") {
            if !(0..=10).contains(&strip) {
                report
                    .errors
                    .push(format!("apply_patch: strip level {strip} out of range"));
            }
        }
        if let Some(subdir) = params::get_str(params_map, "subdir") {
            if !params::is_safe_relative_path(subdir) {
                report
                    .errors
                    .push(format!("apply_patch: invalid subdir path {subdir:?}"));
            }
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let report = self.preflight(params_map);
        if !report.is_ok() {
            bail!("{}", report.errors.join("; "));
        }

        let strip = params::get_i64(params_map, "strip").unwrap_or(1);
        let content = match params::get_str(params_map, "url") {
            Some(url) => {
                let content = download_patch(url)?;
                debug!(url = %sanitize_url(url), "apply_patch: downloaded patch");
                content
            }
            None => {
                debug!("apply_patch: using inline patch data");
                params::require_str(params_map, "data", "apply_patch")?.to_string()
            }
        };

        let mut work_dir = ctx.work_dir.clone();
        if let Some(subdir) = params::get_str(params_map, "subdir") {
            work_dir = work_dir.join(subdir);
            if !work_dir.is_dir() {
                bail!("apply_patch: subdir {subdir:?} does not exist");
            }
        }

        ctx.cancel.ensure_active()?;
        apply(&work_dir, &content, strip)
    }
}

fn download_patch(url: &str) -> Result<String> {
    net::ensure_https(url)?;
    let client = net::http_client()?;
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to fetch patch from {}", sanitize_url(url)))?;
    if !response.status().is_success() {
        bail!(
            "unexpected status {} fetching patch from {}",
            response.status(),
            sanitize_url(url)
        );
    }
    response
        .text()
        .with_context(|| format!("failed to read patch from {}", sanitize_url(url)))
}

fn apply(work_dir: &Path, content: &str, strip: i64) -> Result<()> {
    let patch_path = which::which("patch")
        .context("patch command not found: please install the patch utility")?;

    let mut child = Command::new(patch_path)
        .arg("-p")
        .arg(strip.to_string())
        .arg("--batch")
        .current_dir(work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to start patch")?;
    child
        .stdin
        .take()
        .context("missing patch stdin")?
        .write_all(content.as_bytes())?;
    let output = child.wait_with_output()?;
    if !output.status.success() {
        bail!(
            "patch failed with status {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
