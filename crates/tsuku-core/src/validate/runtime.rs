use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::process::{run_command, run_command_with_timeout, RunOutput};

/// Container label applied to validation containers so leaked ones can be
/// found and reaped.
pub const CONTAINER_LABEL: &str = "dev.tsuku.validation";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeKind {
    Podman,
    Docker,
}

impl RuntimeKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Podman => "podman",
            Self::Docker => "docker",
        }
    }
}

/// A detected container runtime and whether it runs rootless.
#[derive(Clone, Debug)]
pub struct ContainerRuntime {
    pub kind: RuntimeKind,
    pub program: PathBuf,
    pub rootless: bool,
}

/// Detects the available container runtime, preferring Podman over Docker
/// and rootless over rootful. Detection is cached; `reset` clears it.
#[derive(Default)]
pub struct RuntimeDetector {
    cached: Mutex<Option<Option<ContainerRuntime>>>,
}

impl RuntimeDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` means no runtime is installed; validation is then skipped.
    ///
    /// # Errors
    /// Returns an error only for lock poisoning, never for a missing
    /// runtime.
    pub fn detect(&self) -> Result<Option<ContainerRuntime>> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| anyhow::anyhow!("runtime detector lock poisoned"))?;
        if let Some(result) = cached.as_ref() {
            return Ok(result.clone());
        }
        let detected = detect_runtime();
        if let Some(runtime) = &detected {
            debug!(runtime = runtime.kind.name(), rootless = runtime.rootless, "container runtime detected");
        }
        *cached = Some(detected.clone());
        Ok(detected)
    }

    pub fn reset(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }
}

fn detect_runtime() -> Option<ContainerRuntime> {
    if let Ok(program) = which::which("podman") {
        let rootless = podman_is_rootless(&program);
        return Some(ContainerRuntime {
            kind: RuntimeKind::Podman,
            program,
            rootless,
        });
    }
    if let Ok(program) = which::which("docker") {
        let rootless = docker_is_rootless(&program);
        return Some(ContainerRuntime {
            kind: RuntimeKind::Docker,
            program,
            rootless,
        });
    }
    None
}

fn podman_is_rootless(program: &std::path::Path) -> bool {
    run_command(
        &program.to_string_lossy(),
        &[
            "info".to_string(),
            "--format".to_string(),
            "{{.Host.Security.Rootless}}".to_string(),
        ],
        &[],
        std::path::Path::new("."),
    )
    .map(|output| output.code == 0 && output.stdout.trim() == "true")
    .unwrap_or(false)
}

fn docker_is_rootless(program: &std::path::Path) -> bool {
    run_command(
        &program.to_string_lossy(),
        &[
            "info".to_string(),
            "--format".to_string(),
            "{{.SecurityOptions}}".to_string(),
        ],
        &[],
        std::path::Path::new("."),
    )
    .map(|output| output.code == 0 && output.stdout.contains("rootless"))
    .unwrap_or(false)
}

/// Resource limits applied to every validation container.
#[derive(Clone, Debug)]
pub struct ResourceLimits {
    pub memory: String,
    pub cpus: String,
    pub pids_max: u32,
    pub read_only: bool,
    pub timeout: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: "2g".to_string(),
            cpus: "2".to_string(),
            pids_max: 100,
            read_only: true,
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Mount {
    pub source: PathBuf,
    pub target: PathBuf,
    pub read_only: bool,
}

/// One container invocation.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub image: String,
    pub command: Vec<String>,
    /// `host` is required for in-container downloads.
    pub network: String,
    pub workdir: PathBuf,
    pub env: Vec<(String, String)>,
    pub limits: ResourceLimits,
    pub labels: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
}

/// Runs a container to completion under the configured limits.
///
/// # Errors
/// Returns an error when the runtime cannot be spawned, the timeout
/// expires, or the token is cancelled. A non-zero container exit is NOT an
/// error; it is reported through [`RunOutput::code`].
pub fn run_container(
    runtime: &ContainerRuntime,
    opts: &RunOptions,
    cancel: &CancelToken,
) -> Result<RunOutput> {
    let args = build_run_args(opts);
    run_command_with_timeout(
        &runtime.program.to_string_lossy(),
        &args,
        &[],
        std::path::Path::new("."),
        opts.limits.timeout,
        cancel,
    )
}

fn build_run_args(opts: &RunOptions) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--network".to_string(),
        opts.network.clone(),
        "--ipc".to_string(),
        "none".to_string(),
        "--memory".to_string(),
        opts.limits.memory.clone(),
        "--cpus".to_string(),
        opts.limits.cpus.clone(),
        "--pids-limit".to_string(),
        opts.limits.pids_max.to_string(),
    ];
    if opts.limits.read_only {
        args.push("--read-only".to_string());
    }
    args.push("--workdir".to_string());
    args.push(opts.workdir.display().to_string());
    for (key, value) in &opts.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    for mount in &opts.mounts {
        args.push("--volume".to_string());
        let suffix = if mount.read_only { ":ro" } else { "" };
        args.push(format!(
            "{}:{}{suffix}",
            mount.source.display(),
            mount.target.display()
        ));
    }
    for (key, value) in &opts.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(opts.image.clone());
    args.extend(opts.command.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_carry_limits_mounts_and_env() {
        let opts = RunOptions {
            image: "debian:bookworm-slim".into(),
            command: vec!["/bin/sh".into(), "/workspace/validate.sh".into()],
            network: "host".into(),
            workdir: PathBuf::from("/workspace"),
            env: vec![("TSUKU_VALIDATION".into(), "1".into())],
            limits: ResourceLimits {
                read_only: false,
                ..ResourceLimits::default()
            },
            labels: vec![(CONTAINER_LABEL.into(), "true".into())],
            mounts: vec![
                Mount {
                    source: PathBuf::from("/tmp/ws"),
                    target: PathBuf::from("/workspace"),
                    read_only: false,
                },
                Mount {
                    source: PathBuf::from("/usr/bin/tsuku"),
                    target: PathBuf::from("/usr/local/bin/tsuku"),
                    read_only: true,
                },
            ],
        };
        let args = build_run_args(&opts);
        let joined = args.join(" ");

        assert!(joined.starts_with("run --rm --network host --ipc none"));
        assert!(joined.contains("--memory 2g"));
        assert!(joined.contains("--cpus 2"));
        assert!(joined.contains("--pids-limit 100"));
        assert!(!joined.contains("--read-only"), "install runs need writes");
        assert!(joined.contains("--volume /tmp/ws:/workspace "));
        assert!(joined.contains("--volume /usr/bin/tsuku:/usr/local/bin/tsuku:ro"));
        assert!(joined.contains("--env TSUKU_VALIDATION=1"));
        assert!(joined.contains(&format!("--label {CONTAINER_LABEL}=true")));
        assert!(joined.ends_with("debian:bookworm-slim /bin/sh /workspace/validate.sh"));
    }

    #[test]
    fn read_only_flag_appears_when_enabled() {
        let opts = RunOptions {
            image: "debian:bookworm-slim".into(),
            command: vec!["true".into()],
            network: "none".into(),
            workdir: PathBuf::from("/"),
            env: Vec::new(),
            limits: ResourceLimits::default(),
            labels: Vec::new(),
            mounts: Vec::new(),
        };
        assert!(build_run_args(&opts).contains(&"--read-only".to_string()));
    }

    #[test]
    fn detector_caches_and_resets() {
        let detector = RuntimeDetector::new();
        let first = detector.detect().expect("detect");
        let second = detector.detect().expect("detect again");
        assert_eq!(first.is_some(), second.is_some());
        detector.reset();
        let third = detector.detect().expect("detect after reset");
        assert_eq!(first.is_some(), third.is_some());
    }
}
