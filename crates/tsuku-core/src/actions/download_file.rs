use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use super::{params, Action, ExecutionContext, PreflightReport};
use crate::net;
use crate::sanitize::sanitize_url;
use crate::template::expand_vars;
use tsuku_domain::Params;

/// Downloads a single file into the workspace, verifying a checksum when
/// one is pinned. HTTPS only; a non-2xx status or checksum mismatch is
/// fatal.
pub struct DownloadFileAction;

impl DownloadFileAction {
    fn dest_name(url: &str, params_map: &Params, vars: &crate::template::Vars) -> Result<String> {
        if let Some(dest) = params::get_str(params_map, "dest") {
            let expanded = expand_vars(dest, vars);
            if !params::is_safe_relative_path(&expanded) {
                bail!("download_file: invalid dest path {expanded:?}");
            }
            return Ok(expanded);
        }
        let name = url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .map(|name| name.split(['?', '#']).next().unwrap_or(name))
            .unwrap_or_default();
        if name.is_empty() {
            bail!("download_file: cannot derive a file name from {url:?}; set 'dest'");
        }
        Ok(name.to_string())
    }
}

impl Action for DownloadFileAction {
    fn name(&self) -> &'static str {
        "download_file"
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params_map: &Params) -> PreflightReport {
        let mut report = PreflightReport::ok();
        match params::get_str(params_map, "url") {
            None => report
                .errors
                .push("download_file requires the 'url' parameter".into()),
            Some(url) => {
                if !url.starts_with("https://") {
                    report
                        .errors
                        .push(format!("non-HTTPS url {:?} is not allowed", sanitize_url(url)));
                }
            }
        }
        if let Some(checksum) = params::get_str(params_map, "checksum") {
            if !checksum.starts_with("sha256:") && !checksum.starts_with("sha512:") {
                report.errors.push(format!(
                    "checksum {checksum:?} must be prefixed with sha256: or sha512:"
                ));
            }
        }
        report
    }

    fn execute(&self, ctx: &ExecutionContext, params_map: &Params) -> Result<()> {
        let vars = ctx.vars();
        let url = params::require_str(params_map, "url", "download_file")?;
        let url = expand_vars(url, &vars);
        net::ensure_https(&url)?;

        let dest_name = Self::dest_name(&url, params_map, &vars)?;
        let dest = ctx.work_dir.join(&dest_name);
        let expected = params::get_string(params_map, "checksum");

        // The plan generator primes the cache; reuse it before any socket.
        if let Some(hit) = ctx.cache.and_then(|cache| cache.lookup(&url)) {
            debug!(url = %sanitize_url(&url), "download_file: using cached asset");
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&hit.path, &dest)?;
            verify_checksum(&dest, expected.as_deref())?;
            return Ok(());
        }

        ctx.cancel.ensure_active()?;
        debug!(url = %sanitize_url(&url), dest = %dest.display(), "download_file: fetching");
        fetch_to_file(&url, &dest)?;
        verify_checksum(&dest, expected.as_deref())?;
        Ok(())
    }
}

fn fetch_to_file(url: &str, dest: &Path) -> Result<()> {
    let client = net::http_client()?;
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to fetch {}", sanitize_url(url)))?;
    if !response.status().is_success() {
        bail!(
            "unexpected status {} fetching {}",
            response.status(),
            sanitize_url(url)
        );
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;
    let mut buffer = vec![0_u8; 64 * 1024];
    loop {
        let read = response
            .read(&mut buffer)
            .with_context(|| format!("stream error for {}", sanitize_url(url)))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])?;
    }
    Ok(())
}

/// Compares the file's digest with the pinned `sha256:`/`sha512:` value.
/// The error carries both digests so mismatches are diagnosable.
fn verify_checksum(path: &Path, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected.filter(|e| !e.is_empty()) else {
        return Ok(());
    };
    let actual = if expected.starts_with("sha512:") {
        hash_file::<Sha512>(path).map(|digest| format!("sha512:{digest}"))?
    } else {
        hash_file::<Sha256>(path).map(|digest| format!("sha256:{digest}"))?
    };
    if actual != expected {
        let _ = fs::remove_file(path);
        bail!(
            "checksum mismatch for {}: expected {expected}, got {actual}",
            path.display()
        );
    }
    Ok(())
}

fn hash_file<D: Digest>(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = D::new();
    let mut buffer = vec![0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use serde_json::json;

    fn ctx(work: &Path) -> ExecutionContext<'static> {
        ExecutionContext {
            cancel: CancelToken::new(),
            work_dir: work.to_path_buf(),
            install_dir: work.join(".install"),
            tools_dir: work.join("tools"),
            tool_name: "demo".into(),
            version: "1.0.0".into(),
            version_tag: "v1.0.0".into(),
            exec_paths: Vec::new(),
            cache: None,
        }
    }

    #[test]
    fn preflight_requires_https_url() {
        let action = DownloadFileAction;
        assert!(!action.preflight(&Params::new()).is_ok());

        let http = json!({ "url": "http://example.com/a" })
            .as_object()
            .cloned()
            .unwrap();
        assert!(!action.preflight(&http).is_ok());

        let https = json!({ "url": "https://example.com/a" })
            .as_object()
            .cloned()
            .unwrap();
        assert!(action.preflight(&https).is_ok());

        let bad_checksum = json!({ "url": "https://example.com/a", "checksum": "0011" })
            .as_object()
            .cloned()
            .unwrap();
        assert!(!action.preflight(&bad_checksum).is_ok());
    }

    #[test]
    fn dest_defaults_to_url_file_name() {
        let vars = crate::template::Vars::new();
        assert_eq!(
            DownloadFileAction::dest_name(
                "https://example.com/dl/tool.tar.gz?token=x",
                &Params::new(),
                &vars
            )
            .expect("name"),
            "tool.tar.gz"
        );
        let params = json!({ "dest": "renamed.tar.gz" })
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(
            DownloadFileAction::dest_name("https://example.com/x", &params, &vars).expect("name"),
            "renamed.tar.gz"
        );
        let escape = json!({ "dest": "../outside" }).as_object().cloned().unwrap();
        assert!(DownloadFileAction::dest_name("https://example.com/x", &escape, &vars).is_err());
    }

    #[test]
    fn execute_rejects_http_urls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let action = DownloadFileAction;
        let params = json!({ "url": "http://example.com/a.tar.gz" })
            .as_object()
            .cloned()
            .unwrap();
        assert!(action.execute(&ctx(dir.path()), &params).is_err());
    }

    #[test]
    fn cached_assets_skip_the_network_and_verify_checksums() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = crate::download::DownloadCache::new(dir.path().join("cache")).expect("cache");
        let src = dir.path().join("seed.bin");
        fs::write(&src, b"cached bytes").expect("seed");
        let checksum = crate::download::file_sha256(&src).expect("hash");
        let url = "https://example.invalid/never-fetched.bin";
        cache.save(url, &src, &checksum).expect("save");

        let work = dir.path().join("work");
        fs::create_dir_all(&work).expect("work");
        let mut ctx = ctx(&work);
        ctx.cache = Some(Box::leak(Box::new(cache)));

        let params = json!({ "url": url, "checksum": checksum })
            .as_object()
            .cloned()
            .unwrap();
        DownloadFileAction.execute(&ctx, &params).expect("execute");
        assert_eq!(
            fs::read(work.join("never-fetched.bin")).expect("read"),
            b"cached bytes"
        );
    }

    #[test]
    fn checksum_mismatch_names_both_digests() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("file.bin");
        fs::write(&path, b"actual contents").expect("write");
        let wrong = format!("sha256:{}", "0".repeat(64));
        let err = verify_checksum(&path, Some(&wrong)).expect_err("mismatch");
        let text = err.to_string();
        assert!(text.contains(&wrong));
        assert!(text.contains("sha256:"));
        assert!(!path.exists(), "mismatched file must be removed");
    }
}
