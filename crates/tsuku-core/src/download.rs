use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempDir};

use crate::cancel::CancelToken;
use crate::net;
use crate::sanitize::sanitize_url;

/// A downloaded asset: path on disk, its SHA-256 as `sha256:<hex>`, and the
/// byte size. The file lives until the result is dropped unless it has been
/// persisted into a cache.
#[derive(Debug)]
pub struct DownloadResult {
    pub asset_path: PathBuf,
    pub checksum: String,
    pub size: u64,
    // Keeps the temp file alive for the lifetime of the result.
    _temp: Option<tempfile::TempPath>,
}

impl DownloadResult {
    /// Wraps an existing file the caller owns (cache hits, test stubs); no
    /// temp-file cleanup is attached.
    #[must_use]
    pub fn from_existing(asset_path: PathBuf, checksum: String, size: u64) -> Self {
        Self {
            asset_path,
            checksum,
            size,
            _temp: None,
        }
    }
}

/// The capability the plan generator needs: fetch a URL, get back bytes
/// plus checksum. Implemented by [`PreDownloader`]; tests substitute stubs.
pub trait Downloader {
    /// # Errors
    /// Returns an error for non-HTTPS URLs, transport failures, non-2xx
    /// statuses, and cancellation.
    fn download(&self, cancel: &CancelToken, url: &str) -> Result<DownloadResult>;
}

/// HTTPS GET with streaming SHA-256 computation. Bodies stream into temp
/// files under a private directory that disappears with the downloader.
pub struct PreDownloader {
    client: reqwest::blocking::Client,
    scratch: TempDir,
}

impl PreDownloader {
    /// # Errors
    /// Returns an error when the HTTP client or scratch directory cannot be
    /// created.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: net::http_client()?,
            scratch: tempfile::Builder::new()
                .prefix("tsuku-dl-")
                .tempdir()
                .context("failed to create download scratch directory")?,
        })
    }
}

impl Downloader for PreDownloader {
    fn download(&self, cancel: &CancelToken, url: &str) -> Result<DownloadResult> {
        cancel.ensure_active()?;
        net::ensure_https(url)?;

        let mut response = self
            .client
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

        let mut tmp = NamedTempFile::new_in(self.scratch.path())
            .context("failed to create download temp file")?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0_u8; 64 * 1024];
        let mut size: u64 = 0;
        loop {
            cancel.ensure_active()?;
            let read = response
                .read(&mut buffer)
                .with_context(|| format!("stream error for {}", sanitize_url(url)))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            tmp.write_all(&buffer[..read])?;
            size += read as u64;
        }
        tmp.flush()?;

        let checksum = format!("sha256:{}", hex::encode(hasher.finalize()));
        let temp_path = tmp.into_temp_path();
        Ok(DownloadResult {
            asset_path: temp_path.to_path_buf(),
            checksum,
            size,
            _temp: Some(temp_path),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAsset {
    pub url: String,
    pub path: PathBuf,
    pub checksum: String,
    pub size: u64,
}

/// On-disk download cache keyed by URL. Entries are the asset bytes plus a
/// JSON sidecar recording url/checksum/size. Concurrent writers may race on
/// first fill but always agree on content.
#[derive(Debug, Clone)]
pub struct DownloadCache {
    dir: PathBuf,
}

impl DownloadCache {
    /// # Errors
    /// Returns an error when the cache directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn key(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    fn asset_path(&self, url: &str) -> PathBuf {
        self.dir.join(Self::key(url))
    }

    fn meta_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key(url)))
    }

    /// Copies a downloaded file into the cache under its URL key.
    ///
    /// # Errors
    /// Returns an error when the copy or metadata write fails.
    pub fn save(&self, url: &str, src: &Path, checksum: &str) -> Result<()> {
        let dest = self.asset_path(url);
        fs::copy(src, &dest)
            .with_context(|| format!("failed to cache {}", sanitize_url(url)))?;
        let size = fs::metadata(&dest)?.len();
        let meta = CachedAsset {
            url: url.to_string(),
            path: dest,
            checksum: checksum.to_string(),
            size,
        };
        let encoded = serde_json::to_vec_pretty(&meta)?;
        fs::write(self.meta_path(url), encoded)?;
        Ok(())
    }

    /// Looks up a previously cached asset. Returns `None` when the entry or
    /// its bytes are missing.
    #[must_use]
    pub fn lookup(&self, url: &str) -> Option<CachedAsset> {
        let raw = fs::read_to_string(self.meta_path(url)).ok()?;
        let meta: CachedAsset = serde_json::from_str(&raw).ok()?;
        if meta.path.exists() {
            Some(meta)
        } else {
            None
        }
    }
}

/// Computes `sha256:<hex>` over a file.
///
/// # Errors
/// Returns an error when the file cannot be read.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; 32 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_urls_are_rejected_before_any_socket() {
        let downloader = PreDownloader::new().expect("downloader");
        let cancel = CancelToken::new();
        let err = downloader
            .download(&cancel, "http://example.com/a.tar.gz")
            .expect_err("http must be rejected");
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let downloader = PreDownloader::new().expect("downloader");
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(downloader
            .download(&cancel, "https://example.com/a.tar.gz")
            .is_err());
    }

    #[test]
    fn cache_round_trips_assets_by_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DownloadCache::new(dir.path().join("cache")).expect("cache");

        let src = dir.path().join("asset.bin");
        fs::write(&src, b"payload").expect("write");
        let checksum = file_sha256(&src).expect("hash");

        let url = "https://example.com/dl/asset.bin";
        assert!(cache.lookup(url).is_none());
        cache.save(url, &src, &checksum).expect("save");

        let hit = cache.lookup(url).expect("hit");
        assert_eq!(hit.url, url);
        assert_eq!(hit.checksum, checksum);
        assert_eq!(hit.size, 7);
        assert_eq!(fs::read(&hit.path).expect("read"), b"payload");

        // A different URL with the same bytes is a distinct entry.
        assert!(cache.lookup("https://example.com/dl/other.bin").is_none());
    }

    #[test]
    fn file_sha256_matches_known_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty");
        fs::write(&path, b"").expect("write");
        assert_eq!(
            file_sha256(&path).expect("hash"),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
