use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Creates or replaces a symlink atomically: the link is created under a
/// temporary name in the same directory, then renamed over the final path,
/// so observers never see a missing link.
///
/// # Errors
/// Returns an error when the temporary link cannot be created or renamed.
pub fn atomic_symlink(target: &Path, link_path: &Path) -> Result<()> {
    let link_dir = link_path.parent().context("link path has no parent")?;
    let link_name = link_path
        .file_name()
        .and_then(|n| n.to_str())
        .context("link path has no file name")?;
    let tmp_path = link_dir.join(format!(".{link_name}.tmp"));

    let _ = std::fs::remove_file(&tmp_path);
    create_link(target, &tmp_path)
        .with_context(|| format!("failed to create temporary symlink {}", tmp_path.display()))?;
    if let Err(err) = std::fs::rename(&tmp_path, link_path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err).with_context(|| {
            format!("failed to rename symlink into place at {}", link_path.display())
        });
    }
    Ok(())
}

#[cfg(unix)]
fn create_link(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

/// Windows symlinks need elevation; a launcher file with the same contract
/// stands in for them.
#[cfg(windows)]
fn create_link(target: &Path, link: &Path) -> std::io::Result<()> {
    let body = format!("@echo off\r\n\"{}\" %*\r\n", target.display());
    std::fs::write(link, body)
}

#[cfg(not(any(unix, windows)))]
fn create_link(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

/// Validates that a symlink target stays inside the tools directory, so a
/// malicious version string can never point `current/` outside
/// `$TSUKU_HOME/tools/`. The prefix check is component-wise, so
/// `tools-malicious` does not pass as a prefix of `tools`.
///
/// # Errors
/// Returns an error when the resolved target leaves the tools directory.
pub fn validate_symlink_target(target: &Path, tools_dir: &Path) -> Result<()> {
    let clean_target = absolutize(target)?;
    let clean_tools = absolutize(tools_dir)?;

    if clean_target != clean_tools && !clean_target.starts_with(&clean_tools) {
        bail!(
            "symlink target {} is outside tools directory {}",
            target.display(),
            tools_dir.display()
        );
    }
    Ok(())
}

/// Lexically absolute + normalized: no filesystem access, so validation
/// works before the target exists.
fn absolutize(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("could not determine the current directory")?
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn creates_and_replaces_links_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let old_target = dir.path().join("tools/tool-1.0.0/bin/tool");
        let new_target = dir.path().join("tools/tool-2.0.0/bin/tool");
        std::fs::create_dir_all(old_target.parent().unwrap()).expect("mkdir");
        std::fs::create_dir_all(new_target.parent().unwrap()).expect("mkdir");
        std::fs::write(&old_target, b"v1").expect("write");
        std::fs::write(&new_target, b"v2").expect("write");

        let current = dir.path().join("current");
        std::fs::create_dir_all(&current).expect("mkdir");
        let link = current.join("tool");

        atomic_symlink(&old_target, &link).expect("first link");
        assert_eq!(std::fs::read_link(&link).expect("read"), old_target);

        atomic_symlink(&new_target, &link).expect("replace link");
        assert_eq!(std::fs::read_link(&link).expect("read"), new_target);

        // No temporary leftover remains.
        assert!(!current.join(".tool.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn repeated_swaps_are_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("tools/tool-1.0.0/bin/tool");
        std::fs::create_dir_all(target.parent().unwrap()).expect("mkdir");
        std::fs::write(&target, b"v1").expect("write");
        let link = dir.path().join("tool");

        atomic_symlink(&target, &link).expect("first");
        atomic_symlink(&target, &link).expect("second");
        assert_eq!(std::fs::read_link(&link).expect("read"), target);
        assert!(!dir.path().join(".tool.tmp").exists());
    }

    #[test]
    fn targets_inside_tools_dir_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = dir.path().join("tools");
        let target = tools.join("tool-1.0.0/bin/tool");
        validate_symlink_target(&target, &tools).expect("inside");
    }

    #[test]
    fn partial_directory_name_matches_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = dir.path().join("tools");
        let evil = dir.path().join("tools-malicious/bin/tool");
        assert!(validate_symlink_target(&evil, &tools).is_err());
    }

    #[test]
    fn traversal_out_of_tools_dir_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = dir.path().join("tools");
        let escape = tools.join("tool-1.0.0/../../../etc/passwd");
        assert!(validate_symlink_target(&escape, &tools).is_err());
    }
}
