use anyhow::{bail, Result};
use serde_json::Value;

use super::{params, Action, EvalContext, ExecutionContext, PreflightReport, PrimitiveStep};
use crate::template::{apply_arch_mapping, apply_os_mapping, expand_params};
use tsuku_domain::Params;

/// Keys that exist only to steer decomposition and never reach primitives.
const MAPPING_KEYS: &[&str] = &["os_mapping", "arch_mapping"];

fn preflight_url(action: &str, params_map: &Params) -> PreflightReport {
    match params::get_str(params_map, "url") {
        None => PreflightReport::error(format!("{action} requires the 'url' parameter")),
        Some(url) if !url.starts_with("https://") => {
            PreflightReport::error(format!("{action}: non-HTTPS url {url:?} is not allowed"))
        }
        Some(_) => PreflightReport::ok(),
    }
}

/// Expands a composite's params against the platform vars, applying the
/// step's own os/arch mappings first, and drops the mapping tables.
fn expanded_without_mappings(ctx: &EvalContext, params_map: &Params) -> Params {
    let mut vars = ctx.vars();
    apply_os_mapping(&mut vars, params_map);
    apply_arch_mapping(&mut vars, params_map);
    let mut expanded = expand_params(params_map, &vars);
    for key in MAPPING_KEYS {
        expanded.remove(*key);
    }
    expanded
}

fn composite_execute_error(name: &str) -> Result<()> {
    bail!("composite action '{name}' must be decomposed into primitives before execution")
}

/// Fetch a single file. A composite alias that decomposes to one
/// `download_file` step; kept so older recipes using `download` keep
/// working.
pub struct DownloadAction;

impl Action for DownloadAction {
    fn name(&self) -> &'static str {
        "download"
    }

    fn is_decomposable(&self) -> bool {
        true
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        preflight_url("download", params_map)
    }

    fn execute(&self, _ctx: &ExecutionContext, _params: &Params) -> Result<()> {
        composite_execute_error("download")
    }

    fn decompose(&self, ctx: &EvalContext, params_map: &Params) -> Result<Vec<PrimitiveStep>> {
        let expanded = expanded_without_mappings(ctx, params_map);
        Ok(vec![PrimitiveStep::new("download_file", expanded)])
    }
}

/// Fetch an archive and unpack it: decomposes to `download_file` followed
/// by `extract`.
pub struct DownloadArchiveAction;

impl Action for DownloadArchiveAction {
    fn name(&self) -> &'static str {
        "download_archive"
    }

    fn is_decomposable(&self) -> bool {
        true
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        preflight_url("download_archive", params_map)
    }

    fn execute(&self, _ctx: &ExecutionContext, _params: &Params) -> Result<()> {
        composite_execute_error("download_archive")
    }

    fn decompose(&self, ctx: &EvalContext, params_map: &Params) -> Result<Vec<PrimitiveStep>> {
        let expanded = expanded_without_mappings(ctx, params_map);
        let url = params::require_str(&expanded, "url", "download_archive")?.to_string();

        let mut download = Params::new();
        download.insert("url".into(), Value::String(url.clone()));
        if let Some(checksum) = params::get_str(&expanded, "checksum") {
            download.insert("checksum".into(), Value::String(checksum.to_string()));
        }
        let archive_name = url
            .rsplit('/')
            .next()
            .map(|name| name.split(['?', '#']).next().unwrap_or(name).to_string())
            .filter(|name| !name.is_empty());
        if let Some(name) = &archive_name {
            download.insert("dest".into(), Value::String(name.clone()));
        }

        let mut extract = Params::new();
        if let Some(name) = archive_name {
            extract.insert("archive".into(), Value::String(name));
        }
        if let Some(strip) = expanded.get("strip_components") {
            extract.insert("strip_components".into(), strip.clone());
        }

        Ok(vec![
            PrimitiveStep::new("download_file", download),
            PrimitiveStep::new("extract", extract),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::version::Resolver;
    use serde_json::json;

    fn eval_ctx<'a>(
        cancel: &'a CancelToken,
        recipe: &'a tsuku_domain::Recipe,
        resolver: &'a Resolver,
    ) -> EvalContext<'a> {
        EvalContext {
            cancel,
            version: "1.2.3".into(),
            version_tag: "v1.2.3".into(),
            os: "linux".into(),
            arch: "amd64".into(),
            recipe,
            resolver,
            downloader: None,
            cache: None,
        }
    }

    fn recipe() -> tsuku_domain::Recipe {
        tsuku_domain::Recipe::from_toml(
            "[metadata]\nname = \"demo\"\n\n[version]\nsource = \"static\"\nversion = \"1.2.3\"\n",
        )
        .expect("recipe")
    }

    #[test]
    fn download_archive_decomposes_to_download_and_extract() {
        let cancel = CancelToken::new();
        let recipe = recipe();
        let resolver = Resolver::new().expect("resolver");
        let ctx = eval_ctx(&cancel, &recipe, &resolver);

        let params_map = json!({
            "url": "https://example.com/{version}/tool_{os}_{arch}.tar.gz",
            "strip_components": 1,
            "arch_mapping": { "amd64": "x86_64" },
        })
        .as_object()
        .cloned()
        .unwrap();

        let steps = DownloadArchiveAction.decompose(&ctx, &params_map).expect("decompose");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action, "download_file");
        assert_eq!(
            steps[0].params["url"],
            json!("https://example.com/1.2.3/tool_linux_x86_64.tar.gz")
        );
        assert_eq!(steps[0].params["dest"], json!("tool_linux_x86_64.tar.gz"));
        assert_eq!(steps[1].action, "extract");
        assert_eq!(steps[1].params["archive"], json!("tool_linux_x86_64.tar.gz"));
        assert_eq!(steps[1].params["strip_components"], json!(1));
        assert!(!steps[0].params.contains_key("arch_mapping"));
    }

    #[test]
    fn download_alias_emits_a_single_primitive() {
        let cancel = CancelToken::new();
        let recipe = recipe();
        let resolver = Resolver::new().expect("resolver");
        let ctx = eval_ctx(&cancel, &recipe, &resolver);

        let params_map = json!({ "url": "https://example.com/tool-{version}" })
            .as_object()
            .cloned()
            .unwrap();
        let steps = DownloadAction.decompose(&ctx, &params_map).expect("decompose");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, "download_file");
        assert_eq!(steps[0].params["url"], json!("https://example.com/tool-1.2.3"));
    }

    #[test]
    fn composites_refuse_direct_execution() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exec_ctx = ExecutionContext {
            cancel: CancelToken::new(),
            work_dir: dir.path().to_path_buf(),
            install_dir: dir.path().join(".install"),
            tools_dir: dir.path().join("tools"),
            tool_name: "demo".into(),
            version: "1.0.0".into(),
            version_tag: "v1.0.0".into(),
            exec_paths: Vec::new(),
            cache: None,
        };
        assert!(DownloadArchiveAction.execute(&exec_ctx, &Params::new()).is_err());
    }
}
