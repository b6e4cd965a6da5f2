use anyhow::{bail, Context, Result};
use serde_json::Value;

use super::{params, Action, ActionDeps, EvalContext, ExecutionContext, PreflightReport, PrimitiveStep};
use tsuku_domain::Params;

/// Install a Python CLI application the pipx way: an isolated venv per
/// package. Decomposes to `pip_exec` with a hash-locked requirements
/// document built from the PyPI release metadata at plan time.
pub struct PipxInstallAction;

fn is_valid_pypi_package(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 100
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Builds a `package==version --hash=sha256:...` requirements document from
/// the release's wheel digests.
pub(super) fn locked_requirements(
    package: &str,
    version: &str,
    release_doc: &Value,
) -> Result<String> {
    let urls = release_doc
        .get("urls")
        .and_then(Value::as_array)
        .context("release metadata has no urls array")?;
    let mut hashes: Vec<String> = urls
        .iter()
        .filter(|file| {
            file.get("packagetype").and_then(Value::as_str) == Some("bdist_wheel")
                && !file.get("yanked").and_then(Value::as_bool).unwrap_or(false)
        })
        .filter_map(|file| {
            file.get("digests")
                .and_then(|d| d.get("sha256"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect();
    hashes.sort();
    hashes.dedup();
    if hashes.is_empty() {
        bail!("no wheel digests published for {package}=={version}");
    }

    let mut out = format!("{package}=={version}");
    for hash in hashes {
        out.push_str(" \\\n    --hash=sha256:");
        out.push_str(&hash);
    }
    out.push('\n');
    Ok(out)
}

impl Action for PipxInstallAction {
    fn name(&self) -> &'static str {
        "pipx_install"
    }

    fn is_decomposable(&self) -> bool {
        true
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps {
            install_time: vec!["python-standalone".into()],
            runtime: vec!["python-standalone".into()],
            eval_time: Vec::new(),
        }
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        match params::get_str(params_map, "package") {
            None => PreflightReport::error("pipx_install requires the 'package' parameter"),
            Some(package) if !is_valid_pypi_package(package) => {
                PreflightReport::error(format!("pipx_install: invalid package name {package:?}"))
            }
            Some(_) => PreflightReport::ok(),
        }
    }

    fn execute(&self, _ctx: &ExecutionContext, _params: &Params) -> Result<()> {
        bail!("composite action 'pipx_install' must be decomposed into primitives before execution")
    }

    fn decompose(&self, ctx: &EvalContext, params_map: &Params) -> Result<Vec<PrimitiveStep>> {
        let report = self.preflight(params_map);
        if !report.is_ok() {
            bail!("{}", report.errors.join("; "));
        }
        let package = params::require_str(params_map, "package", "pipx_install")?;
        let executables = params::get_string_slice(params_map, "executables")
            .unwrap_or_else(|| vec![package.to_string()]);
        params::ensure_safe_executable_names(&executables, "pipx_install")?;

        let url = format!(
            "{}/pypi/{}/{}/json",
            ctx.resolver.pypi_base, package, ctx.version
        );
        let doc = ctx
            .resolver
            .get_json("pypi", &url)
            .with_context(|| format!("failed to read release metadata for {package}"))?;
        let requirements = locked_requirements(package, &ctx.version, &doc)?;

        let mut step = Params::new();
        step.insert("package".into(), Value::String(package.to_string()));
        step.insert("version".into(), Value::String(ctx.version.clone()));
        step.insert(
            "executables".into(),
            Value::Array(executables.into_iter().map(Value::String).collect()),
        );
        step.insert("locked_requirements".into(), Value::String(requirements));
        if let Some(python_version) = params::get_str(params_map, "python_version") {
            step.insert(
                "python_version".into(),
                Value::String(python_version.to_string()),
            );
        }
        Ok(vec![PrimitiveStep::new("pip_exec", step)])
    }
}
