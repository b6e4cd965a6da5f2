use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::actions::{self, ActionRegistry, EvalContext, PrimitiveStep};
use crate::cancel::CancelToken;
use crate::download::{DownloadCache, Downloader};
use crate::template::{apply_arch_mapping, apply_os_mapping, expand_params};
use crate::version::{self, Resolver, VersionInfo};
use tsuku_domain::{
    InstallationPlan, Params, Patch, PlanVerify, Platform, Recipe, ResolvedStep,
    PLAN_FORMAT_VERSION,
};

/// Loads recipes by name for dependency-subgraph expansion.
pub trait RecipeLoader {
    /// # Errors
    /// Returns an error when the recipe does not exist or cannot be parsed.
    fn load(&self, name: &str) -> Result<Recipe>;
}

/// Configuration for one plan generation run.
pub struct PlanOptions<'a> {
    /// Target OS (`linux`, `darwin`, ...); defaults to the host.
    pub os: Option<String>,
    /// Target architecture (`amd64`, `arm64`, ...); defaults to the host.
    pub arch: Option<String>,
    /// `"registry"`, a file path, or `"dependency"`.
    pub recipe_source: String,
    /// Called for non-evaluable steps and version-resolution fallbacks.
    pub on_warning: Option<&'a dyn Fn(&str, &str)>,
    /// Computes checksums for download steps; without one, no checksums are
    /// pinned.
    pub downloader: Option<&'a dyn Downloader>,
    /// Receives downloaded assets for later offline execution.
    pub cache: Option<&'a DownloadCache>,
    pub auto_accept_eval_deps: bool,
    /// Installs missing eval-time dependencies; without one, missing deps
    /// fail plan generation.
    pub on_eval_deps_needed: Option<&'a dyn Fn(&[String], bool) -> Result<()>>,
    /// Enables dependency-subgraph expansion; subplans never get a loader
    /// themselves, transitive deps are walked here explicitly.
    pub recipe_loader: Option<&'a dyn RecipeLoader>,
}

impl Default for PlanOptions<'_> {
    fn default() -> Self {
        Self {
            os: None,
            arch: None,
            recipe_source: "registry".to_string(),
            on_warning: None,
            downloader: None,
            cache: None,
            auto_accept_eval_deps: false,
            on_eval_deps_needed: None,
            recipe_loader: None,
        }
    }
}

/// The host platform in the `(os, arch)` vocabulary recipes use.
#[must_use]
pub fn host_platform() -> (String, String) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    (os.to_string(), arch.to_string())
}

/// Evaluates a recipe into a fully-resolved, self-contained plan: version
/// pinned, composites decomposed to primitives, URLs and checksums
/// recorded, patches inserted after extraction, and dependency subplans
/// prepended.
///
/// # Errors
/// Returns an error when a step cannot be resolved; version-resolution
/// failures fall back to the `"dev"` sentinel with a warning instead.
pub fn generate_plan(
    cancel: &CancelToken,
    registry: &ActionRegistry,
    resolver: &Resolver,
    recipe: &Recipe,
    opts: &PlanOptions<'_>,
) -> Result<InstallationPlan> {
    let (host_os, host_arch) = host_platform();
    let target_os = opts.os.clone().unwrap_or(host_os);
    let target_arch = opts.arch.clone().unwrap_or(host_arch);

    let version_info = match version::resolve(resolver, &recipe.version) {
        Ok(info) => info,
        Err(err) => {
            // Recipes without a usable version source still install; the
            // sentinel keeps directory names and templates well-formed.
            emit_warning(
                opts,
                "version",
                &format!("version resolution failed: {err}, using 'dev'"),
            );
            VersionInfo {
                version: "dev".to_string(),
                tag: "dev".to_string(),
            }
        }
    };

    let recipe_hash = compute_recipe_hash(recipe)?;

    let eval_ctx = EvalContext {
        cancel,
        version: version_info.version.clone(),
        version_tag: version_info.tag.clone(),
        os: target_os.clone(),
        arch: target_arch.clone(),
        recipe,
        resolver,
        downloader: opts.downloader,
        cache: opts.cache,
    };

    let mut steps = Vec::new();
    for step in &recipe.steps {
        if let Some(when) = &step.when {
            if !when.matches(&target_os, &target_arch) {
                continue;
            }
        }
        let resolved = resolve_step(cancel, registry, &eval_ctx, opts, &step.action, &step.params)
            .with_context(|| format!("failed to resolve step {}", step.action))?;
        steps.extend(resolved);
    }

    if !recipe.patches.is_empty() {
        steps = insert_patch_steps(registry, steps, &recipe.patches);
    }

    if opts.recipe_loader.is_some() {
        let dep_steps = generate_dependency_steps(cancel, registry, resolver, recipe, opts)?;
        if !dep_steps.is_empty() {
            let mut combined = dep_steps;
            combined.extend(steps);
            steps = combined;
        }
    }

    let deterministic = steps.iter().all(|step| step.deterministic);

    let verify = recipe.verify.as_ref().map(|verify| PlanVerify {
        command: verify.command.clone(),
        pattern: verify.pattern.clone(),
        exit_code: verify.exit_code,
    });

    Ok(InstallationPlan {
        format_version: PLAN_FORMAT_VERSION,
        tool: recipe.metadata.name.clone(),
        version: version_info.version,
        platform: Platform {
            os: target_os,
            arch: target_arch,
        },
        generated_at: OffsetDateTime::now_utc(),
        recipe_hash,
        recipe_source: opts.recipe_source.clone(),
        deterministic,
        recipe_type: recipe.metadata.kind.as_str().to_string(),
        verify,
        steps,
    })
}

/// SHA-256 over the recipe's TOML serialization; identifies the exact
/// recipe bytes a plan was generated from.
pub fn compute_recipe_hash(recipe: &Recipe) -> Result<String> {
    let toml = recipe.to_toml().context("failed to serialize recipe")?;
    Ok(hex::encode(Sha256::digest(toml.as_bytes())))
}

fn emit_warning(opts: &PlanOptions<'_>, action: &str, message: &str) {
    warn!(action, detail = message, "plan generation warning");
    if let Some(on_warning) = opts.on_warning {
        on_warning(action, message);
    }
}

fn resolve_step(
    cancel: &CancelToken,
    registry: &ActionRegistry,
    eval_ctx: &EvalContext<'_>,
    opts: &PlanOptions<'_>,
    action_name: &str,
    raw_params: &Params,
) -> Result<Vec<ResolvedStep>> {
    let action = registry
        .get(action_name)
        .ok_or_else(|| anyhow!("unknown action '{action_name}'"))?;

    if action.is_decomposable() {
        ensure_eval_deps(opts, &action.dependencies().eval_time)?;

        // Raw params go straight to decompose so the action can apply its
        // own os/arch mappings before templates bake in host values.
        let primitives = action
            .decompose(eval_ctx, raw_params)
            .with_context(|| format!("failed to decompose {action_name}"))?;

        let mut resolved = Vec::with_capacity(primitives.len());
        for primitive in primitives {
            resolved.push(resolve_primitive(cancel, registry, opts, primitive)?);
        }
        return Ok(resolved);
    }

    // Non-decomposable: apply mappings to a copy of the vars, then expand.
    let mut vars = eval_ctx.vars();
    apply_os_mapping(&mut vars, raw_params);
    apply_arch_mapping(&mut vars, raw_params);
    let expanded = expand_params(raw_params, &vars);

    let evaluable = action.is_evaluable();
    if !evaluable {
        emit_warning(
            opts,
            action_name,
            &format!("action '{action_name}' cannot be deterministically reproduced"),
        );
    }

    let mut resolved = ResolvedStep {
        action: action_name.to_string(),
        params: expanded,
        url: None,
        checksum: None,
        size: None,
        evaluable,
        deterministic: action.is_deterministic(),
    };
    pin_download(cancel, opts, &mut resolved)?;
    Ok(vec![resolved])
}

fn resolve_primitive(
    cancel: &CancelToken,
    registry: &ActionRegistry,
    opts: &PlanOptions<'_>,
    primitive: PrimitiveStep,
) -> Result<ResolvedStep> {
    let evaluable = registry.is_evaluable(&primitive.action);
    let deterministic = registry.is_deterministic(&primitive.action);
    if !evaluable {
        emit_warning(
            opts,
            &primitive.action,
            &format!("action '{}' cannot be deterministically reproduced", primitive.action),
        );
    }

    let mut resolved = ResolvedStep {
        action: primitive.action,
        params: primitive.params,
        url: None,
        checksum: None,
        size: None,
        evaluable,
        deterministic,
    };

    if let Some(checksum) = primitive.checksum {
        // Decompose already verified the download (URLs behind special
        // auth); trust it and do not fetch again.
        resolved.checksum = Some(checksum);
        resolved.size = primitive.size;
        if let Some(Value::String(url)) = resolved.params.get("url") {
            resolved.url = Some(url.clone());
        }
        return Ok(resolved);
    }

    pin_download(cancel, opts, &mut resolved)?;
    Ok(resolved)
}

/// For download steps, records `{url, checksum, size}` on the resolved
/// step, downloading through the configured downloader and priming the
/// cache for offline execution.
fn pin_download(
    cancel: &CancelToken,
    opts: &PlanOptions<'_>,
    resolved: &mut ResolvedStep,
) -> Result<()> {
    if !matches!(resolved.action.as_str(), "download" | "download_file") {
        return Ok(());
    }
    let Some(Value::String(url)) = resolved.params.get("url") else {
        return Ok(());
    };
    let url = url.clone();
    resolved.url = Some(url.clone());

    if let Some(Value::String(pinned)) = resolved.params.get("checksum") {
        resolved.checksum = Some(pinned.clone());
    }

    let Some(downloader) = opts.downloader else {
        return Ok(());
    };
    // Download even with a pinned checksum so the asset lands in the cache
    // for container validation.
    let result = downloader
        .download(cancel, &url)
        .with_context(|| format!("failed to download for caching: {url}"))?;
    if let Some(cache) = opts.cache {
        let checksum = resolved
            .checksum
            .clone()
            .unwrap_or_else(|| result.checksum.clone());
        cache
            .save(&url, &result.asset_path, &checksum)
            .context("failed to save to download cache")?;
    }
    if resolved.checksum.is_none() {
        resolved.checksum = Some(result.checksum.clone());
    }
    if resolved.size.is_none() {
        resolved.size = Some(result.size);
    }
    debug!(%url, checksum = ?resolved.checksum, "pinned download step");
    Ok(())
}

fn ensure_eval_deps(opts: &PlanOptions<'_>, eval_deps: &[String]) -> Result<()> {
    if eval_deps.is_empty() {
        return Ok(());
    }
    let missing = actions::missing_eval_deps(eval_deps);
    if missing.is_empty() {
        return Ok(());
    }
    match opts.on_eval_deps_needed {
        Some(on_needed) => on_needed(&missing, opts.auto_accept_eval_deps)
            .context("eval-time dependencies not satisfied"),
        None => bail!(
            "missing eval-time dependencies: {} (install with: tsuku install {})",
            missing.join(", "),
            missing[0]
        ),
    }
}

/// Converts patches to `apply_patch` steps inserted just after the last
/// `extract` step, so patches land on extracted sources before builds.
fn insert_patch_steps(
    registry: &ActionRegistry,
    steps: Vec<ResolvedStep>,
    patches: &[Patch],
) -> Vec<ResolvedStep> {
    let insert_at = steps
        .iter()
        .rposition(|step| step.action == "extract")
        .map_or(0, |idx| idx + 1);

    let patch_steps: Vec<ResolvedStep> = patches
        .iter()
        .map(|patch| {
            let mut params = Params::new();
            if let Some(url) = &patch.url {
                params.insert("url".into(), Value::String(url.clone()));
            }
            if let Some(data) = &patch.data {
                params.insert("data".into(), Value::String(data.clone()));
            }
            if let Some(strip) = patch.strip {
                params.insert("strip".into(), Value::from(strip));
            }
            if let Some(subdir) = &patch.subdir {
                params.insert("subdir".into(), Value::String(subdir.clone()));
            }
            ResolvedStep {
                action: "apply_patch".to_string(),
                params,
                url: None,
                checksum: None,
                size: None,
                evaluable: registry.is_evaluable("apply_patch"),
                deterministic: registry.is_deterministic("apply_patch"),
            }
        })
        .collect();

    let mut out = Vec::with_capacity(steps.len() + patch_steps.len());
    out.extend(steps.iter().take(insert_at).cloned());
    out.extend(patch_steps);
    out.extend(steps.iter().skip(insert_at).cloned());
    out
}

/// Expands the recipe's dependency graph into prepended steps: transitive
/// dependencies precede direct ones, processing order is sorted by name,
/// and an already-processed set (seeded with the root tool) breaks cycles
/// and de-duplicates shared dependencies.
fn generate_dependency_steps(
    cancel: &CancelToken,
    registry: &ActionRegistry,
    resolver: &Resolver,
    recipe: &Recipe,
    opts: &PlanOptions<'_>,
) -> Result<Vec<ResolvedStep>> {
    let Some(loader) = opts.recipe_loader else {
        return Ok(Vec::new());
    };
    let deps = actions::resolve_dependencies(recipe, registry);
    if deps.install_time.is_empty() {
        return Ok(Vec::new());
    }

    let mut processed = std::collections::HashSet::new();
    processed.insert(recipe.metadata.name.clone());

    let mut names = deps.install_time.clone();
    names.sort();

    let mut steps = Vec::new();
    for name in names {
        steps.extend(steps_for_dependency(
            cancel,
            registry,
            resolver,
            loader,
            &name,
            opts,
            &mut processed,
        )?);
    }
    Ok(steps)
}

fn steps_for_dependency(
    cancel: &CancelToken,
    registry: &ActionRegistry,
    resolver: &Resolver,
    loader: &dyn RecipeLoader,
    name: &str,
    opts: &PlanOptions<'_>,
    processed: &mut std::collections::HashSet<String>,
) -> Result<Vec<ResolvedStep>> {
    if !processed.insert(name.to_string()) {
        return Ok(Vec::new());
    }
    let Ok(dep_recipe) = loader.load(name) else {
        // Not in the registry; likely a system dependency.
        debug!(dependency = name, "skipping dependency without a recipe");
        return Ok(Vec::new());
    };

    // Transitive dependencies first, so C precedes B precedes A.
    let mut steps = Vec::new();
    let dep_deps = actions::resolve_dependencies(&dep_recipe, registry);
    let mut names = dep_deps.install_time;
    names.sort();
    for transitive in names {
        steps.extend(steps_for_dependency(
            cancel,
            registry,
            resolver,
            loader,
            &transitive,
            opts,
            processed,
        )?);
    }

    let dep_opts = PlanOptions {
        os: opts.os.clone(),
        arch: opts.arch.clone(),
        recipe_source: "dependency".to_string(),
        on_warning: opts.on_warning,
        downloader: opts.downloader,
        cache: opts.cache,
        auto_accept_eval_deps: opts.auto_accept_eval_deps,
        on_eval_deps_needed: opts.on_eval_deps_needed,
        // Transitive deps were walked above; a loader here would recurse
        // forever.
        recipe_loader: None,
    };
    let plan = generate_plan(cancel, registry, resolver, &dep_recipe, &dep_opts)
        .with_context(|| format!("failed to generate plan for dependency {name}"))?;
    steps.extend(plan.steps);
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::registry;
    use crate::download::DownloadResult;
    use std::collections::HashMap;
    use std::io::Write;

    /// Serves canned bytes for URLs without touching the network.
    struct StubDownloader {
        dir: tempfile::TempDir,
        bodies: HashMap<String, Vec<u8>>,
    }

    impl StubDownloader {
        fn new(bodies: &[(&str, &[u8])]) -> Self {
            Self {
                dir: tempfile::tempdir().expect("tempdir"),
                bodies: bodies
                    .iter()
                    .map(|(url, body)| ((*url).to_string(), body.to_vec()))
                    .collect(),
            }
        }
    }

    impl Downloader for StubDownloader {
        fn download(&self, _cancel: &CancelToken, url: &str) -> Result<DownloadResult> {
            let body = self
                .bodies
                .get(url)
                .ok_or_else(|| anyhow!("stub has no body for {url}"))?;
            let path = self.dir.path().join(hex::encode(Sha256::digest(url)));
            let mut file = std::fs::File::create(&path)?;
            file.write_all(body)?;
            Ok(DownloadResult::from_existing(
                path,
                format!("sha256:{}", hex::encode(Sha256::digest(body))),
                body.len() as u64,
            ))
        }
    }

    fn static_recipe(toml: &str) -> Recipe {
        Recipe::from_toml(toml).expect("recipe")
    }

    fn options() -> PlanOptions<'static> {
        PlanOptions {
            os: Some("linux".into()),
            arch: Some("amd64".into()),
            ..PlanOptions::default()
        }
    }

    const TOOL_A: &str = r#"
[metadata]
name = "tool-a"

[version]
source = "static"
version = "1.2.3"

[[steps]]
action = "github_archive"
[steps.params]
repo = "example/tool-a"
asset_pattern = "tool-a_{version}_{os}_{arch}.tar.gz"

[[steps]]
action = "install_binaries"
[steps.params]
binaries = ["tool-a"]

[verify]
command = "tool-a --version"
pattern = "tool-a"
"#;

    #[test]
    fn composites_never_survive_into_plans() {
        let recipe = static_recipe(TOOL_A);
        let url = "https://github.com/example/tool-a/releases/download/v1.2.3/tool-a_1.2.3_linux_amd64.tar.gz";
        let downloader = StubDownloader::new(&[(url, b"archive bytes")]);
        let cancel = CancelToken::new();
        let resolver = Resolver::new().expect("resolver");
        let opts = PlanOptions {
            downloader: Some(&downloader),
            ..options()
        };

        let plan = generate_plan(&cancel, registry(), &resolver, &recipe, &opts).expect("plan");
        let actions: Vec<&str> = plan.steps.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(actions, vec!["download_file", "extract", "install_binaries"]);
        assert!(!actions.contains(&"github_archive"));

        let download = &plan.steps[0];
        assert_eq!(download.url.as_deref(), Some(url));
        assert_eq!(
            download.checksum.as_deref(),
            Some(format!("sha256:{}", hex::encode(Sha256::digest(b"archive bytes"))).as_str())
        );
        assert_eq!(download.size, Some(13));
        assert!(plan.deterministic);
        assert_eq!(plan.verify.as_ref().expect("verify").command, "tool-a --version");
    }

    #[test]
    fn plans_are_deterministic_for_evaluable_recipes() {
        let recipe = static_recipe(TOOL_A);
        let url = "https://github.com/example/tool-a/releases/download/v1.2.3/tool-a_1.2.3_linux_amd64.tar.gz";
        let downloader = StubDownloader::new(&[(url, b"archive bytes")]);
        let cancel = CancelToken::new();
        let resolver = Resolver::new().expect("resolver");
        let opts = PlanOptions {
            downloader: Some(&downloader),
            ..options()
        };

        let first = generate_plan(&cancel, registry(), &resolver, &recipe, &opts).expect("first");
        let second = generate_plan(&cancel, registry(), &resolver, &recipe, &opts).expect("second");

        assert_eq!(first.recipe_hash, second.recipe_hash);
        assert_eq!(
            serde_json::to_string(&first.steps).expect("encode"),
            serde_json::to_string(&second.steps).expect("encode")
        );
        assert!(first.deterministic && second.deterministic);
    }

    #[test]
    fn when_clauses_gate_on_the_target_platform() {
        let recipe = static_recipe(
            r#"
[metadata]
name = "gated"

[version]
source = "static"
version = "1.0.0"

[[steps]]
action = "run_shell"
when = { os = "darwin" }
[steps.params]
command = "echo mac only"

[[steps]]
action = "run_shell"
when = { os = "linux" }
[steps.params]
command = "echo linux only"
"#,
        );
        let cancel = CancelToken::new();
        let resolver = Resolver::new().expect("resolver");
        let plan =
            generate_plan(&cancel, registry(), &resolver, &recipe, &options()).expect("plan");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(
            plan.steps[0].params["command"],
            serde_json::json!("echo linux only")
        );
        assert!(!plan.deterministic, "run_shell steps are non-deterministic");
    }

    #[test]
    fn patches_insert_after_the_last_extract() {
        let recipe = static_recipe(
            r#"
[metadata]
name = "patched"

[version]
source = "static"
version = "1.0.0"

[[steps]]
action = "download_archive"
[steps.params]
url = "https://example.com/src.tar.gz"

[[steps]]
action = "install_binaries"
[steps.params]
binaries = ["patched"]

[[patches]]
data = "--- a/x\n+++ b/x\n"
strip = 1
"#,
        );
        let url = "https://example.com/src.tar.gz";
        let downloader = StubDownloader::new(&[(url, b"src")]);
        let cancel = CancelToken::new();
        let resolver = Resolver::new().expect("resolver");
        let opts = PlanOptions {
            downloader: Some(&downloader),
            ..options()
        };

        let plan = generate_plan(&cancel, registry(), &resolver, &recipe, &opts).expect("plan");
        let actions: Vec<&str> = plan.steps.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["download_file", "extract", "apply_patch", "install_binaries"]
        );
        assert_eq!(plan.steps[2].params["strip"], serde_json::json!(1));
    }

    #[test]
    fn dependency_steps_are_prepended_and_deduplicated() {
        struct MapLoader(HashMap<String, String>);
        impl RecipeLoader for MapLoader {
            fn load(&self, name: &str) -> Result<Recipe> {
                self.0
                    .get(name)
                    .map(|toml| Recipe::from_toml(toml))
                    .transpose()?
                    .ok_or_else(|| anyhow!("recipe {name} not found"))
            }
        }

        let dep_a = r#"
[metadata]
name = "dep-a"

[version]
source = "static"
version = "0.1.0"

[[steps]]
action = "run_shell"
[steps.params]
command = "echo install dep-a"
"#;
        let tool_b = r#"
[metadata]
name = "tool-b"
dependencies = ["dep-a"]

[version]
source = "static"
version = "2.0.0"

[[steps]]
action = "run_shell"
[steps.params]
command = "echo install tool-b"
"#;
        let loader = MapLoader(HashMap::from([("dep-a".to_string(), dep_a.to_string())]));
        let recipe = static_recipe(tool_b);
        let cancel = CancelToken::new();
        let resolver = Resolver::new().expect("resolver");
        let opts = PlanOptions {
            recipe_loader: Some(&loader),
            ..options()
        };

        let plan = generate_plan(&cancel, registry(), &resolver, &recipe, &opts).expect("plan");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(
            plan.steps[0].params["command"],
            serde_json::json!("echo install dep-a")
        );
        assert_eq!(
            plan.steps[1].params["command"],
            serde_json::json!("echo install tool-b")
        );
        assert_eq!(plan.recipe_source, "registry");
    }

    #[test]
    fn dependency_cycles_are_broken_by_the_processed_set() {
        struct CycleLoader;
        impl RecipeLoader for CycleLoader {
            fn load(&self, name: &str) -> Result<Recipe> {
                let other = if name == "ping" { "pong" } else { "ping" };
                Recipe::from_toml(&format!(
                    "[metadata]\nname = \"{name}\"\ndependencies = [\"{other}\"]\n\n\
                     [version]\nsource = \"static\"\nversion = \"1.0.0\"\n\n\
                     [[steps]]\naction = \"run_shell\"\n[steps.params]\ncommand = \"echo {name}\"\n"
                ))
            }
        }

        let recipe = static_recipe(
            "[metadata]\nname = \"ping\"\ndependencies = [\"pong\"]\n\n\
             [version]\nsource = \"static\"\nversion = \"1.0.0\"\n\n\
             [[steps]]\naction = \"run_shell\"\n[steps.params]\ncommand = \"echo root\"\n",
        );
        let cancel = CancelToken::new();
        let resolver = Resolver::new().expect("resolver");
        let loader = CycleLoader;
        let opts = PlanOptions {
            recipe_loader: Some(&loader),
            ..options()
        };

        let plan = generate_plan(&cancel, registry(), &resolver, &recipe, &opts).expect("plan");
        // pong's steps once, then the root's own step; ping is never
        // re-expanded because the processed set is seeded with it.
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(
            plan.steps[0].params["command"],
            serde_json::json!("echo pong")
        );
        assert_eq!(
            plan.steps[1].params["command"],
            serde_json::json!("echo root")
        );
    }

    #[test]
    fn unresolvable_versions_fall_back_to_dev_with_a_warning() {
        let recipe = static_recipe(
            "[metadata]\nname = \"broken\"\n\n[version]\nsource = \"github_releases\"\n",
        );
        let warned = std::sync::Mutex::new(Vec::new());
        let on_warning = |action: &str, message: &str| {
            warned
                .lock()
                .unwrap()
                .push(format!("{action}: {message}"));
        };
        let cancel = CancelToken::new();
        let resolver = Resolver::new().expect("resolver");
        let opts = PlanOptions {
            on_warning: Some(&on_warning),
            ..options()
        };

        let plan = generate_plan(&cancel, registry(), &resolver, &recipe, &opts).expect("plan");
        assert_eq!(plan.version, "dev");
        let warnings = warned.lock().unwrap();
        assert!(warnings.iter().any(|w| w.contains("using 'dev'")));
    }

    #[test]
    fn recipe_hash_tracks_recipe_bytes() {
        let first = static_recipe(TOOL_A);
        let second = static_recipe(&TOOL_A.replace("1.2.3", "1.2.4"));
        let hash_a = compute_recipe_hash(&first).expect("hash");
        let hash_b = compute_recipe_hash(&first).expect("hash again");
        let hash_c = compute_recipe_hash(&second).expect("hash other");
        assert_eq!(hash_a, hash_b);
        assert_ne!(hash_a, hash_c);
        assert_eq!(hash_a.len(), 64);
    }
}
