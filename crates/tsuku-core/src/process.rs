use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::cancel::CancelToken;

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Execute a program and capture stdout/stderr.
///
/// An empty value in `envs` removes the variable from the child's
/// environment instead of setting it to the empty string.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or the I/O streams
/// cannot be read entirely.
pub fn run_command(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
) -> Result<RunOutput> {
    let mut command = Command::new(program);
    command.args(args);
    for (key, value) in envs {
        if value.is_empty() {
            command.env_remove(key);
        } else {
            command.env(key, value);
        }
    }
    command.current_dir(cwd);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let output = command
        .output()
        .with_context(|| format!("failed to start {program}"))?;
    let code = output.status.code().unwrap_or(-1);
    Ok(RunOutput {
        code,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Execute a program with a hard deadline and cooperative cancellation.
/// The child is killed when either fires.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned, the deadline
/// passes, or the cancel token trips.
pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<RunOutput> {
    cancel.ensure_active()?;

    let mut command = Command::new(program);
    command.args(args);
    for (key, value) in envs {
        if value.is_empty() {
            command.env_remove(key);
        } else {
            command.env(key, value);
        }
    }
    command.current_dir(cwd);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;

    let stdout = child.stdout.take().context("missing child stdout")?;
    let stderr = child.stderr.take().context("missing child stderr")?;
    let stdout_reader = std::thread::spawn(move || drain(stdout));
    let stderr_reader = std::thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait().context("failed to poll child process")? {
            break status;
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            bail!("{program} cancelled");
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!("{program} timed out after {}s", timeout.as_secs());
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();
    Ok(RunOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

fn drain(mut stream: impl Read) -> String {
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn run_command_captures_output_and_status() -> Result<()> {
        let output = run_command(
            "/bin/sh",
            &[
                "-c".to_string(),
                "printf out && printf err >&2; exit 7".to_string(),
            ],
            &[],
            Path::new("."),
        )?;
        assert_eq!(output.code, 7);
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn run_command_passes_env() -> Result<()> {
        let output = run_command(
            "/bin/sh",
            &["-c".to_string(), "printf '%s' \"$TSUKU_TEST_VAR\"".to_string()],
            &[("TSUKU_TEST_VAR".to_string(), "hello".to_string())],
            Path::new("."),
        )?;
        assert_eq!(output.stdout, "hello");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_slow_children() {
        let cancel = CancelToken::new();
        let err = run_command_with_timeout(
            "/bin/sh",
            &["-c".to_string(), "sleep 30".to_string()],
            &[],
            Path::new("."),
            Duration::from_millis(200),
            &cancel,
        )
        .expect_err("expected timeout");
        assert!(err.to_string().contains("timed out"));
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_token_refuses_to_spawn() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run_command_with_timeout(
            "/bin/sh",
            &["-c".to_string(), "true".to_string()],
            &[],
            Path::new("."),
            Duration::from_secs(5),
            &cancel,
        )
        .expect_err("expected cancellation");
        assert!(err.to_string().contains("cancelled"));
    }
}
