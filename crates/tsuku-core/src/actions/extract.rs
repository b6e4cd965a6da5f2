use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tracing::debug;
use xz2::read::XzDecoder;

use super::{params, Action, ExecutionContext, PreflightReport};
use tsuku_domain::Params;

/// Unpacks tar (`.gz`/`.xz`/`.bz2`), and zip archives inside the
/// workspace. Entries that would escape the destination, including
/// symlinks whose resolved target leaves it, are refused.
pub struct ExtractAction;

impl Action for ExtractAction {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let mut report = PreflightReport::ok();
        for key in ["archive", "dest"] {
            if let Some(value) = params::get_str(params_map, key) {
                if !params::is_safe_relative_path(value) {
                    report
                        .errors
                        .push(format!("extract: invalid {key} path {value:?}"));
                }
            }
        }
        if let Some(strip) = params::get_i64(params_map, "strip_components") {
            if !(0..=10).contains(&strip) {
                report
                    .errors
                    .push(format!("extract: strip_components {strip} out of range"));
            }
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let vars = ctx.vars();
        let archive = match params::get_str(params_map, "archive") {
            Some(name) => ctx
                .work_dir
                .join(crate::template::expand_vars(name, &vars)),
            None => autodetect_archive(&ctx.work_dir)?,
        };
        if !archive.exists() {
            bail!("extract: archive not found at {}", archive.display());
        }

        let dest = match params::get_str(params_map, "dest") {
            Some(dir) => ctx.work_dir.join(crate::template::expand_vars(dir, &vars)),
            None => ctx.work_dir.clone(),
        };
        fs::create_dir_all(&dest)?;

        let strip = params::get_i64(params_map, "strip_components")
            .unwrap_or(0)
            .max(0) as usize;
        let name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        debug!(archive = %archive.display(), dest = %dest.display(), "extract: unpacking");

        let file = fs::File::open(&archive)
            .with_context(|| format!("failed to open {}", archive.display()))?;
        if name.ends_with(".zip") {
            extract_zip(file, &dest, strip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            extract_tar(GzDecoder::new(file), &dest, strip)
        } else if name.ends_with(".tar.xz") {
            extract_tar(XzDecoder::new(file), &dest, strip)
        } else if name.ends_with(".tar.bz2") {
            extract_tar(BzDecoder::new(file), &dest, strip)
        } else if name.ends_with(".tar") {
            extract_tar(file, &dest, strip)
        } else {
            bail!("extract: unrecognized archive format for {name:?}")
        }
        .with_context(|| format!("failed to extract {}", archive.display()))
    }
}

/// When no `archive` is named, exactly one known archive in the workspace
/// root is acceptable.
fn autodetect_archive(work_dir: &Path) -> Result<PathBuf> {
    const SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar.xz", ".tar.bz2", ".tar", ".zip"];
    let mut matches = Vec::new();
    for entry in fs::read_dir(work_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let lower = name.to_ascii_lowercase();
        if SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
            matches.push(entry.path());
        }
    }
    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => bail!("extract: no archive found in workspace; set the 'archive' parameter"),
        _ => bail!("extract: multiple archives in workspace; set the 'archive' parameter"),
    }
}

fn extract_tar(reader: impl Read, dest: &Path, strip: usize) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let Some(out_rel) = strip_components(&path, strip) else {
            continue;
        };
        let out_path = safe_join(dest, &out_rel)?;

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                fs::create_dir_all(&out_path)?;
            }
            tar::EntryType::Symlink | tar::EntryType::Link => {
                let target = entry
                    .link_name()?
                    .context("link entry without a target")?
                    .into_owned();
                validate_link_target(dest, &out_path, &target)?;
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let _ = fs::remove_file(&out_path);
                #[cfg(unix)]
                std::os::unix::fs::symlink(&target, &out_path)?;
                #[cfg(not(unix))]
                bail!("symlink entries are not supported on this platform");
            }
            _ => {
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.unpack(&out_path)?;
            }
        }
    }
    Ok(())
}

fn extract_zip(file: fs::File, dest: &Path, strip: usize) -> Result<()> {
    let mut archive = zip::ZipArchive::new(file).context("failed to read zip archive")?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(path) = entry.enclosed_name() else {
            bail!("zip entry {:?} escapes the destination", entry.name());
        };
        let Some(out_rel) = strip_components(&path, strip) else {
            continue;
        };
        let out_path = safe_join(dest, &out_rel)?;
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut file)?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

/// Drops the first `strip` path components; `None` when nothing remains.
fn strip_components(path: &Path, strip: usize) -> Option<PathBuf> {
    let components: Vec<_> = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    if components.len() <= strip {
        return None;
    }
    Some(components[strip..].iter().collect())
}

/// Joins a relative entry path under the destination, refusing traversal.
fn safe_join(dest: &Path, rel: &Path) -> Result<PathBuf> {
    for component in rel.components() {
        match component {
            Component::Normal(_) => {}
            _ => bail!("archive entry {rel:?} escapes the destination"),
        }
    }
    Ok(dest.join(rel))
}

/// A link target is acceptable only when the lexically-resolved location
/// stays inside the destination tree.
fn validate_link_target(dest: &Path, link_path: &Path, target: &Path) -> Result<()> {
    if target.is_absolute() {
        bail!(
            "symlink {} points at absolute target {}",
            link_path.display(),
            target.display()
        );
    }
    let base = link_path.parent().unwrap_or(dest);
    let resolved = lexical_normalize(&base.join(target));
    let dest_norm = lexical_normalize(dest);
    if !resolved.starts_with(&dest_norm) {
        bail!(
            "symlink {} resolves outside the extraction directory ({})",
            link_path.display(),
            resolved.display()
        );
    }
    Ok(())
}

/// Resolves `.` and `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}
