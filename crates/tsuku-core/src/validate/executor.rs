use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::runtime::{
    run_container, Mount, ResourceLimits, RunOptions, RuntimeDetector, RuntimeKind,
    CONTAINER_LABEL,
};
use crate::cancel::CancelToken;
use crate::process::RunOutput;
use tsuku_domain::Recipe;

/// Debian, because the tsuku binary is dynamically linked against glibc.
pub const DEFAULT_VALIDATION_IMAGE: &str = "debian:bookworm-slim";

/// Outcome of one container validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub passed: bool,
    /// True when no container runtime was available and nothing ran.
    pub skipped: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Orchestrates container-based recipe validation: runtime detection, a
/// scratch workspace holding the recipe and a shell driver, and an
/// isolated `tsuku install` run checked against the recipe's verification.
pub struct Validator<'a> {
    detector: &'a RuntimeDetector,
    image: String,
    limits: ResourceLimits,
    tsuku_binary: Option<PathBuf>,
}

impl<'a> Validator<'a> {
    #[must_use]
    pub fn new(detector: &'a RuntimeDetector) -> Self {
        Self {
            detector,
            image: DEFAULT_VALIDATION_IMAGE.to_string(),
            limits: ResourceLimits::default(),
            tsuku_binary: std::env::current_exe().ok(),
        }
    }

    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_tsuku_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.tsuku_binary = Some(path.into());
        self
    }

    /// Runs the recipe in an isolated container and checks verification.
    ///
    /// # Errors
    /// Returns an error for workspace I/O failures; a missing runtime is a
    /// skipped result, and a failing container is a failed result, neither
    /// an error.
    pub fn validate(&self, cancel: &CancelToken, recipe: &Recipe) -> Result<ValidationResult> {
        let Some(runtime) = self.detector.detect()? else {
            warn!("container runtime not available, skipping recipe validation (install Podman or Docker to enable it)");
            return Ok(ValidationResult {
                skipped: true,
                ..ValidationResult::default()
            });
        };

        if runtime.kind == RuntimeKind::Docker && !runtime.rootless {
            warn!(
                "using Docker with docker group membership; this grants root-equivalent access. \
                 Consider configuring Docker rootless mode (https://docs.docker.com/engine/security/rootless/)"
            );
        }
        debug!(runtime = runtime.kind.name(), rootless = runtime.rootless, "validating recipe");

        let workspace = tempfile::Builder::new()
            .prefix("tsuku-validate-")
            .tempdir()
            .context("failed to create validation workspace")?;

        let recipe_toml = recipe.to_toml()?;
        fs::write(workspace.path().join("recipe.toml"), recipe_toml)
            .context("failed to write recipe file")?;

        let script = install_script(&recipe.metadata.name);
        let script_path = workspace.path().join("validate.sh");
        fs::write(&script_path, script).context("failed to write validation script")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
        }

        // Installation writes under TSUKU_HOME, so the read-only rootfs is
        // relaxed for this scenario.
        let mut limits = self.limits.clone();
        limits.read_only = false;

        let mut mounts = vec![Mount {
            source: workspace.path().to_path_buf(),
            target: PathBuf::from("/workspace"),
            read_only: false,
        }];
        if let Some(binary) = &self.tsuku_binary {
            mounts.push(Mount {
                source: binary.clone(),
                target: PathBuf::from("/usr/local/bin/tsuku"),
                read_only: true,
            });
        }

        let opts = RunOptions {
            image: self.image.clone(),
            command: vec!["/bin/sh".to_string(), "/workspace/validate.sh".to_string()],
            network: "host".to_string(),
            workdir: PathBuf::from("/workspace"),
            env: vec![
                ("TSUKU_VALIDATION".to_string(), "1".to_string()),
                ("TSUKU_HOME".to_string(), "/workspace/tsuku".to_string()),
                ("HOME".to_string(), "/workspace".to_string()),
            ],
            limits,
            labels: vec![(CONTAINER_LABEL.to_string(), "true".to_string())],
            mounts,
        };

        let output = match run_container(&runtime, &opts, cancel) {
            Ok(output) => output,
            Err(err) => {
                return Ok(ValidationResult {
                    passed: false,
                    skipped: false,
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: err.to_string(),
                });
            }
        };

        let passed = check_verification(recipe, &output);
        Ok(ValidationResult {
            passed,
            skipped: false,
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// The shell driver that runs inside the container: certificates for HTTPS
/// downloads, a fresh TSUKU_HOME, the recipe copied into place, then a
/// forced install (which includes verification).
fn install_script(tool_name: &str) -> String {
    format!(
        "#!/bin/sh\n\
         set -e\n\
         \n\
         apt-get update -qq && apt-get install -qq -y ca-certificates >/dev/null 2>&1 || true\n\
         \n\
         mkdir -p /workspace/tsuku/recipes\n\
         mkdir -p /workspace/tsuku/bin\n\
         mkdir -p /workspace/tsuku/tools\n\
         \n\
         cp /workspace/recipe.toml /workspace/tsuku/recipes/{tool_name}.toml\n\
         \n\
         tsuku install {tool_name} --force\n"
    )
}

/// Pass iff the exit code matches the expectation (default 0) and the
/// pattern, when present, appears in combined stdout+stderr.
fn check_verification(recipe: &Recipe, output: &RunOutput) -> bool {
    let expected = recipe
        .verify
        .as_ref()
        .and_then(|verify| verify.exit_code)
        .unwrap_or(0);
    if output.code != expected {
        return false;
    }
    let Some(pattern) = recipe.verify.as_ref().and_then(|verify| verify.pattern.as_deref()) else {
        return true;
    };
    let combined = format!("{}{}", output.stdout, output.stderr);
    combined.contains(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe(verify: &str) -> Recipe {
        Recipe::from_toml(&format!(
            "[metadata]\nname = \"tool-a\"\n\n[version]\nsource = \"static\"\nversion = \"1.0.0\"\n{verify}"
        ))
        .expect("recipe")
    }

    fn output(code: i32, stdout: &str, stderr: &str) -> RunOutput {
        RunOutput {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn verification_checks_exit_code_and_pattern() {
        let with_pattern = recipe("\n[verify]\ncommand = \"tool-a --version\"\npattern = \"tool-a\"\n");
        assert!(check_verification(&with_pattern, &output(0, "tool-a 1.0.0\n", "")));
        assert!(check_verification(&with_pattern, &output(0, "", "tool-a 1.0.0\n")));
        assert!(!check_verification(&with_pattern, &output(0, "other\n", "")));
        assert!(!check_verification(&with_pattern, &output(1, "tool-a\n", "")));
    }

    #[test]
    fn custom_exit_codes_are_honored() {
        let nonzero = recipe("\n[verify]\ncommand = \"tool-a\"\nexit_code = 2\n");
        assert!(check_verification(&nonzero, &output(2, "", "")));
        assert!(!check_verification(&nonzero, &output(0, "", "")));
    }

    #[test]
    fn missing_verify_section_checks_exit_code_only() {
        let bare = recipe("");
        assert!(check_verification(&bare, &output(0, "", "")));
        assert!(!check_verification(&bare, &output(3, "", "")));
    }

    #[test]
    fn install_script_copies_recipe_and_forces_install() {
        let script = install_script("tool-a");
        assert!(script.starts_with("#!/bin/sh\nset -e\n"));
        assert!(script.contains("ca-certificates"));
        assert!(script.contains("cp /workspace/recipe.toml /workspace/tsuku/recipes/tool-a.toml"));
        assert!(script.contains("tsuku install tool-a --force"));
    }
}
