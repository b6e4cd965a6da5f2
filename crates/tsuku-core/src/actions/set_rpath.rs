use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use super::{params, Action, ExecutionContext, PreflightReport};
use crate::process::run_command;
use crate::template::expand_vars;
use tsuku_domain::Params;

const DEFAULT_RPATH: &str = "$ORIGIN/../lib";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinaryFormat {
    Elf,
    MachO,
}

/// Rewrites the RPATH of installed binaries so they find bundled libraries
/// relative to themselves. ELF goes through `patchelf`, Mach-O through
/// `install_name_tool` (with an ad-hoc re-sign on ARM64 macOS). When the
/// tool fails, or `create_wrapper` is set, the binary is replaced with a
/// wrapper script exporting the library path and exec'ing the moved
/// `.orig`.
pub struct SetRpathAction;

impl Action for SetRpathAction {
    fn name(&self) -> &'static str {
        "set_rpath"
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let Some(binaries) = params::get_string_slice(params_map, "binaries") else {
            return PreflightReport::error("set_rpath requires the 'binaries' parameter");
        };
        let mut report = PreflightReport::ok();
        for binary in &binaries {
            if !params::is_safe_relative_path(binary) {
                report
                    .errors
                    .push(format!("set_rpath: invalid binary path {binary:?}"));
            }
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let binaries = params::require_string_slice(params_map, "binaries", "set_rpath")?;
        let rpath = params::get_string(params_map, "rpath")
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_RPATH.to_string());
        let force_wrapper = params::get_bool(params_map, "create_wrapper");
        let vars = ctx.vars();

        for binary in binaries {
            let binary = expand_vars(&binary, &vars);
            if !params::is_safe_relative_path(&binary) {
                bail!("set_rpath: invalid binary path {binary:?}");
            }
            let path = ctx.work_dir.join(&binary);
            if !path.exists() {
                bail!("set_rpath: binary not found at {}", path.display());
            }

            if force_wrapper == Some(true) {
                create_library_wrapper(&path)?;
                continue;
            }

            let format = detect_binary_format(&path)
                .with_context(|| format!("failed to detect binary format for {binary}"))?;
            let result = match format {
                BinaryFormat::Elf => set_rpath_elf(&path, &rpath),
                BinaryFormat::MachO => set_rpath_macho(&path, &rpath),
            };
            match result {
                Ok(()) => debug!(binary = %binary, %rpath, "set_rpath: rewrote rpath"),
                Err(err) => {
                    // Default behavior falls back to a wrapper; an explicit
                    // create_wrapper=false makes the failure fatal.
                    if force_wrapper == Some(false) {
                        return Err(err.context(format!("failed to set RPATH for {binary}")));
                    }
                    warn!(binary = %binary, error = %err, "set_rpath: falling back to wrapper script");
                    create_library_wrapper(&path)
                        .with_context(|| format!("failed to create wrapper for {binary}"))?;
                }
            }
        }
        Ok(())
    }
}

/// Detects ELF, Mach-O, and fat-binary magic numbers.
fn detect_binary_format(path: &Path) -> Result<BinaryFormat> {
    let mut file = fs::File::open(path)?;
    let mut magic = [0_u8; 4];
    file.read_exact(&mut magic)?;

    if magic == [0x7f, b'E', b'L', b'F'] {
        return Ok(BinaryFormat::Elf);
    }
    const MACHO_MAGICS: [[u8; 4]; 6] = [
        [0xfe, 0xed, 0xfa, 0xce], // 32-bit big-endian
        [0xce, 0xfa, 0xed, 0xfe], // 32-bit little-endian
        [0xfe, 0xed, 0xfa, 0xcf], // 64-bit big-endian
        [0xcf, 0xfa, 0xed, 0xfe], // 64-bit little-endian
        [0xca, 0xfe, 0xba, 0xbe], // fat binary big-endian
        [0xbe, 0xba, 0xfe, 0xca], // fat binary little-endian
    ];
    if MACHO_MAGICS.contains(&magic) {
        return Ok(BinaryFormat::MachO);
    }
    bail!("unsupported binary format (magic {magic:02x?})");
}

fn set_rpath_elf(path: &Path, rpath: &str) -> Result<()> {
    let patchelf = which::which("patchelf").context("patchelf not found on PATH")?;
    let output = run_command(
        &patchelf.to_string_lossy(),
        &[
            "--set-rpath".to_string(),
            rpath.to_string(),
            path.display().to_string(),
        ],
        &[],
        path.parent().unwrap_or(Path::new(".")),
    )?;
    if output.code != 0 {
        bail!("patchelf exited with status {}: {}", output.code, output.stderr.trim());
    }
    Ok(())
}

fn set_rpath_macho(path: &Path, rpath: &str) -> Result<()> {
    let tool = which::which("install_name_tool").context("install_name_tool not found on PATH")?;
    // Mach-O uses @loader_path where ELF uses $ORIGIN.
    let rpath = rpath.replace("$ORIGIN", "@loader_path");
    let output = run_command(
        &tool.to_string_lossy(),
        &[
            "-add_rpath".to_string(),
            rpath,
            path.display().to_string(),
        ],
        &[],
        path.parent().unwrap_or(Path::new(".")),
    )?;
    if output.code != 0 {
        bail!(
            "install_name_tool exited with status {}: {}",
            output.code,
            output.stderr.trim()
        );
    }
    // Modifying the load commands invalidates the signature on ARM64 macOS.
    if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        if let Ok(codesign) = which::which("codesign") {
            let output = run_command(
                &codesign.to_string_lossy(),
                &[
                    "--force".to_string(),
                    "-s".to_string(),
                    "-".to_string(),
                    path.display().to_string(),
                ],
                &[],
                path.parent().unwrap_or(Path::new(".")),
            )?;
            if output.code != 0 {
                bail!("codesign exited with status {}: {}", output.code, output.stderr.trim());
            }
        }
    }
    Ok(())
}

/// Moves the binary to `<name>.orig` and installs a shell wrapper that
/// points the loader at `../lib` relative to the wrapper before exec'ing
/// the original.
fn create_library_wrapper(path: &Path) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("binary path has no file name")?;
    let orig = path.with_file_name(format!("{file_name}.orig"));
    fs::rename(path, &orig)?;

    let script = format!(
        "#!/bin/sh\n\
         here=\"$(cd \"$(dirname \"$0\")\" && pwd)\"\n\
         export LD_LIBRARY_PATH=\"$here/../lib${{LD_LIBRARY_PATH:+:$LD_LIBRARY_PATH}}\"\n\
         export DYLD_LIBRARY_PATH=\"$here/../lib${{DYLD_LIBRARY_PATH:+:$DYLD_LIBRARY_PATH}}\"\n\
         exec \"$here/{file_name}.orig\" \"$@\"\n"
    );
    fs::write(path, script)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
