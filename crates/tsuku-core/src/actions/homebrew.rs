use anyhow::{bail, Context, Result};
use serde_json::Value;

use super::{params, Action, EvalContext, ExecutionContext, PreflightReport, PrimitiveStep};
use tsuku_domain::Params;

/// Install a Homebrew bottle: decomposes to `download_file` (with the
/// upstream sha256 attached, since bottle URLs sit behind registry auth the
/// pre-downloader does not speak) followed by `extract`.
pub struct HomebrewAction;

/// Bottle tags to try for a platform, most specific first. `all` is the
/// architecture-independent fallback tag.
fn bottle_tag_candidates(os: &str, arch: &str) -> Vec<&'static str> {
    match (os, arch) {
        ("linux", "amd64") => vec!["x86_64_linux", "all"],
        ("linux", "arm64") => vec!["aarch64_linux", "all"],
        ("darwin", "arm64") => vec!["arm64_sequoia", "arm64_sonoma", "arm64_ventura", "all"],
        ("darwin", "amd64") => vec!["sequoia", "sonoma", "ventura", "all"],
        _ => vec!["all"],
    }
}

fn select_bottle<'a>(
    files: &'a serde_json::Map<String, Value>,
    os: &str,
    arch: &str,
) -> Option<(&'static str, &'a Value)> {
    bottle_tag_candidates(os, arch)
        .into_iter()
        .find_map(|tag| files.get(tag).map(|file| (tag, file)))
}

impl Action for HomebrewAction {
    fn name(&self) -> &'static str {
        "homebrew"
    }

    fn is_decomposable(&self) -> bool {
        true
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        match params::get_str(params_map, "formula") {
            Some(_) => PreflightReport::ok(),
            None => PreflightReport::error("homebrew requires the 'formula' parameter"),
        }
    }

    fn execute(&self, _ctx: &ExecutionContext, _params: &Params) -> Result<()> {
        bail!("composite action 'homebrew' must be decomposed into primitives before execution")
    }

    fn decompose(&self, ctx: &EvalContext, params_map: &Params) -> Result<Vec<PrimitiveStep>> {
        let formula = params::require_str(params_map, "formula", "homebrew")?;
        let url = format!(
            "{}/api/formula/{formula}.json",
            ctx.resolver.homebrew_base
        );
        let doc = ctx
            .resolver
            .get_json("homebrew", &url)
            .with_context(|| format!("failed to read formula metadata for {formula}"))?;

        let files = doc
            .get("bottle")
            .and_then(|b| b.get("stable"))
            .and_then(|s| s.get("files"))
            .and_then(Value::as_object)
            .with_context(|| format!("formula {formula} has no stable bottle files"))?;

        let (tag, file) = select_bottle(files, &ctx.os, &ctx.arch).with_context(|| {
            format!(
                "formula {formula} has no bottle for {}/{} (available: {:?})",
                ctx.os,
                ctx.arch,
                files.keys().collect::<Vec<_>>()
            )
        })?;
        let bottle_url = file
            .get("url")
            .and_then(Value::as_str)
            .with_context(|| format!("bottle entry {tag} for {formula} has no url"))?;
        let sha256 = file
            .get("sha256")
            .and_then(Value::as_str)
            .with_context(|| format!("bottle entry {tag} for {formula} has no sha256"))?;

        let dest = format!("{formula}.bottle.tar.gz");
        let mut download = Params::new();
        download.insert("url".into(), Value::String(bottle_url.to_string()));
        download.insert("dest".into(), Value::String(dest.clone()));
        download.insert(
            "checksum".into(),
            Value::String(format!("sha256:{sha256}")),
        );

        let mut extract = Params::new();
        extract.insert("archive".into(), Value::String(dest));

        let mut download_step = PrimitiveStep::new("download_file", download);
        // The checksum is already verified upstream; the generator must not
        // re-download through registry auth it does not have.
        download_step.checksum = Some(format!("sha256:{sha256}"));
        Ok(vec![download_step, PrimitiveStep::new("extract", extract)])
    }
}
