use std::fs;

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::cli::{Command, InstallArgs, PlanArgs, RemoveArgs, ValidateArgs, VersionsArgs};
use tsuku_core::actions::registry;
use tsuku_core::cancel::CancelToken;
use tsuku_core::config::TsukuHome;
use tsuku_core::download::{DownloadCache, PreDownloader};
use tsuku_core::executor::{generate_plan, DirRecipeLoader, Executor, PlanOptions, RecipeLoader};
use tsuku_core::install::InstallManager;
use tsuku_core::validate::{RuntimeDetector, Validator};
use tsuku_core::version::{provider_for, Resolver};
use tsuku_domain::{InstallationPlan, Recipe};

pub fn dispatch(command: &Command) -> Result<i32> {
    match command {
        Command::Install(args) => cmd_install(args).map(|()| 0),
        Command::Remove(args) => cmd_remove(args).map(|()| 0),
        Command::List => cmd_list().map(|()| 0),
        Command::Plan(args) => cmd_plan(args).map(|()| 0),
        Command::Validate(args) => cmd_validate(args),
        Command::Versions(args) => cmd_versions(args).map(|()| 0),
    }
}

/// A recipe argument is a file path when it looks like one, otherwise a
/// registry name resolved under `$TSUKU_HOME/recipes/`.
fn load_recipe(home: &TsukuHome, spec: &str) -> Result<(Recipe, String)> {
    if spec.ends_with(".toml") || spec.contains('/') || spec.contains('\\') {
        let raw = fs::read_to_string(spec)
            .with_context(|| format!("failed to read recipe file {spec}"))?;
        let recipe = Recipe::from_toml(&raw)?;
        return Ok((recipe, spec.to_string()));
    }
    let recipe = DirRecipeLoader::new(home.recipes_dir()).load(spec)?;
    Ok((recipe, "registry".to_string()))
}

fn cmd_install(args: &InstallArgs) -> Result<()> {
    let home = TsukuHome::from_env()?;
    home.ensure_layout()?;
    let cancel = CancelToken::new();
    let cache = DownloadCache::new(home.cache_dir())?;

    let plan = match &args.plan {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read plan file {}", path.display()))?;
            InstallationPlan::from_toml(&raw)?
        }
        None => {
            let (mut recipe, recipe_source) = load_recipe(&home, &args.tool)?;
            if let Some(version) = &args.version {
                recipe.version.constraint = Some(version.clone());
            }
            build_plan(&home, &cancel, &recipe, &recipe_source, &cache, args.yes)?
        }
    };

    let executor = Executor::new(registry(), home)
        .with_cache(&cache)
        .force(args.force)
        .keep_workspace(args.keep_workspace);
    executor.execute_plan(&cancel, &plan)?;
    println!("installed {} {}", plan.tool, plan.version);
    Ok(())
}

fn build_plan(
    home: &TsukuHome,
    cancel: &CancelToken,
    recipe: &Recipe,
    recipe_source: &str,
    cache: &DownloadCache,
    auto_accept: bool,
) -> Result<InstallationPlan> {
    let resolver = Resolver::new()?;
    let downloader = PreDownloader::new()?;
    let loader = DirRecipeLoader::new(home.recipes_dir());
    let on_warning = |action: &str, message: &str| {
        warn!(action, detail = message, "plan warning");
    };
    let on_eval_deps = move |missing: &[String], accept: bool| -> Result<()> {
        if !accept {
            bail!(
                "missing eval-time dependencies: {} (re-run with --yes to install them)",
                missing.join(", ")
            );
        }
        for dep in missing {
            cmd_install(&InstallArgs {
                tool: dep.clone(),
                version: None,
                force: false,
                plan: None,
                keep_workspace: false,
                yes: true,
            })
            .with_context(|| format!("failed to install eval-time dependency {dep}"))?;
        }
        Ok(())
    };
    let opts = PlanOptions {
        recipe_source: recipe_source.to_string(),
        downloader: Some(&downloader),
        cache: Some(cache),
        recipe_loader: Some(&loader),
        auto_accept_eval_deps: auto_accept,
        on_eval_deps_needed: Some(&on_eval_deps),
        on_warning: Some(&on_warning),
        ..PlanOptions::default()
    };
    generate_plan(cancel, registry(), &resolver, recipe, &opts)
}

fn cmd_remove(args: &RemoveArgs) -> Result<()> {
    let home = TsukuHome::from_env()?;
    let manager = InstallManager::new(home);
    match &args.version {
        Some(version) => {
            manager.remove_version(&args.tool, version)?;
            println!("removed {} {}", args.tool, version);
        }
        None => {
            manager.remove_all_versions(&args.tool)?;
            println!("removed {}", args.tool);
        }
    }
    Ok(())
}

fn cmd_list() -> Result<()> {
    let home = TsukuHome::from_env()?;
    let manager = InstallManager::new(home);
    let state = manager.installed_tools()?;

    if state.installed.is_empty() && state.libs.is_empty() {
        println!("no tools installed");
        return Ok(());
    }
    for (name, tool) in &state.installed {
        for version in tool.versions.keys() {
            let marker = if *version == tool.active_version {
                " (active)"
            } else {
                ""
            };
            println!("{name} {version}{marker}");
        }
    }
    for (name, versions) in &state.libs {
        for (version, entry) in versions {
            println!("{name} {version} (library, used by {})", entry.used_by.len());
        }
    }
    Ok(())
}

fn cmd_plan(args: &PlanArgs) -> Result<()> {
    let home = TsukuHome::from_env()?;
    home.ensure_layout()?;
    let cancel = CancelToken::new();
    let (recipe, recipe_source) = load_recipe(&home, &args.tool)?;

    let resolver = Resolver::new()?;
    let loader = DirRecipeLoader::new(home.recipes_dir());
    let cache = DownloadCache::new(home.cache_dir())?;
    let downloader = if args.no_download {
        None
    } else {
        Some(PreDownloader::new()?)
    };
    let on_warning = |action: &str, message: &str| {
        warn!(action, detail = message, "plan warning");
    };
    let opts = PlanOptions {
        os: args.os.clone(),
        arch: args.arch.clone(),
        recipe_source,
        downloader: downloader.as_ref().map(|d| d as &dyn tsuku_core::download::Downloader),
        cache: Some(&cache),
        recipe_loader: Some(&loader),
        on_warning: Some(&on_warning),
        ..PlanOptions::default()
    };
    let plan = generate_plan(&cancel, registry(), &resolver, &recipe, &opts)?;
    let toml = plan.to_toml()?;

    match &args.output {
        Some(path) => {
            fs::write(path, toml)
                .with_context(|| format!("failed to write plan to {}", path.display()))?;
            println!("wrote plan for {} {} to {}", plan.tool, plan.version, path.display());
        }
        None => print!("{toml}"),
    }
    Ok(())
}

fn cmd_validate(args: &ValidateArgs) -> Result<i32> {
    let home = TsukuHome::from_env()?;
    let cancel = CancelToken::new();
    let (recipe, _) = load_recipe(&home, &args.tool)?;

    let detector = RuntimeDetector::new();
    let mut validator = Validator::new(&detector);
    if let Some(image) = &args.image {
        validator = validator.with_image(image.clone());
    }

    let result = validator.validate(&cancel, &recipe)?;
    if result.skipped {
        println!("validation skipped: no container runtime available");
        return Ok(0);
    }
    if result.passed {
        println!("validation passed for {}", recipe.metadata.name);
        Ok(0)
    } else {
        eprintln!(
            "validation failed for {} (exit code {})",
            recipe.metadata.name, result.exit_code
        );
        if !result.stderr.is_empty() {
            eprintln!("{}", result.stderr.trim_end());
        }
        Ok(1)
    }
}

fn cmd_versions(args: &VersionsArgs) -> Result<()> {
    let home = TsukuHome::from_env()?;
    let (recipe, _) = load_recipe(&home, &args.tool)?;
    let resolver = Resolver::new()?;
    let provider = provider_for(&resolver, &recipe.version)
        .map_err(anyhow::Error::from)
        .context("failed to build version provider")?;
    let versions = provider
        .list_versions()
        .map_err(anyhow::Error::from)
        .with_context(|| format!("failed to list versions for {}", recipe.metadata.name))?;
    for version in versions.iter().take(args.limit) {
        println!("{version}");
    }
    if versions.len() > args.limit {
        println!("... and {} more", versions.len() - args.limit);
    }
    Ok(())
}
