//! Per-ecosystem version resolution.
//!
//! Each source exposes two capabilities: resolve the latest version and
//! list all versions newest-first. A factory maps a recipe's `version`
//! section to a concrete provider. All version strings are normalized to a
//! canonical dotted form before they reach plans.

mod crates_io;
mod errors;
mod github;
mod goproxy;
mod homebrew;
mod metacpan;
mod nixpkgs;
mod nodejs;
mod npm;
mod pypi;
mod rubygems;
mod static_;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use reqwest::blocking::Client;

use crate::net;
use crate::sanitize::sanitize_url;
use tsuku_domain::{VersionSource, VersionSpec};

pub use crates_io::CratesIoProvider;
pub use errors::{ErrorKind, ResolverError};
pub use github::GithubProvider;
pub use goproxy::{GoProxyProvider, InferredGoProxyProvider};
pub use homebrew::HomebrewProvider;
pub use metacpan::MetaCpanProvider;
pub use nixpkgs::NixpkgsProvider;
pub use nodejs::NodejsDistProvider;
pub use npm::NpmProvider;
pub use pypi::PypiProvider;
pub use rubygems::RubygemsProvider;
pub use static_::StaticProvider;

/// A concrete resolved version: the canonical dotted version plus the
/// upstream tag it came from (`v1.2.3`, `go1.21.5`, ...).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub tag: String,
}

impl VersionInfo {
    #[must_use]
    pub fn from_tag(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            version: normalize_version(&tag),
            tag,
        }
    }
}

/// Shared HTTP plumbing for every provider. Registry base URLs live here so
/// tests can point providers at a local server.
pub struct Resolver {
    client: Client,
    pub(crate) github_base: String,
    pub(crate) npm_base: String,
    pub(crate) crates_io_base: String,
    pub(crate) pypi_base: String,
    pub(crate) rubygems_base: String,
    pub(crate) homebrew_base: String,
    pub(crate) goproxy_base: String,
    pub(crate) metacpan_base: String,
    pub(crate) nodejs_base: String,
    pub(crate) goproxy_paths: Mutex<HashMap<String, String>>,
}

impl Resolver {
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: net::registry_client()?,
            github_base: "https://api.github.com".into(),
            npm_base: "https://registry.npmjs.org".into(),
            crates_io_base: "https://crates.io".into(),
            pypi_base: "https://pypi.org".into(),
            rubygems_base: "https://rubygems.org".into(),
            homebrew_base: "https://formulae.brew.sh".into(),
            goproxy_base: "https://proxy.golang.org".into(),
            metacpan_base: "https://fastapi.metacpan.org".into(),
            nodejs_base: "https://nodejs.org".into(),
            goproxy_paths: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// GET a JSON document, mapping transport and status failures onto the
    /// resolver error taxonomy. Logged URLs are sanitized first.
    pub(crate) fn get_json(
        &self,
        source: &str,
        url: &str,
    ) -> Result<serde_json::Value, ResolverError> {
        let response = self.client.get(url).send().map_err(|err| {
            ResolverError::network(source, format!("request to {} failed", sanitize_url(url)))
                .with_cause(err)
        })?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ResolverError::not_found(
                source,
                format!("{} returned 404", sanitize_url(url)),
            ));
        }
        if !status.is_success() {
            return Err(ResolverError::network(
                source,
                format!("unexpected status {status} from {}", sanitize_url(url)),
            ));
        }
        response.json().map_err(|err| {
            ResolverError::parsing(source, format!("invalid JSON from {}", sanitize_url(url)))
                .with_cause(err)
        })
    }

    pub(crate) fn get_text(&self, source: &str, url: &str) -> Result<String, ResolverError> {
        let response = self.client.get(url).send().map_err(|err| {
            ResolverError::network(source, format!("request to {} failed", sanitize_url(url)))
                .with_cause(err)
        })?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ResolverError::not_found(
                source,
                format!("{} returned 404", sanitize_url(url)),
            ));
        }
        if !status.is_success() {
            return Err(ResolverError::network(
                source,
                format!("unexpected status {status} from {}", sanitize_url(url)),
            ));
        }
        response.text().map_err(|err| {
            ResolverError::network(source, format!("read from {} failed", sanitize_url(url)))
                .with_cause(err)
        })
    }
}

/// A per-source version lookup.
pub trait VersionProvider {
    fn source_description(&self) -> String;

    /// # Errors
    /// Returns a [`ResolverError`] classifying the failure.
    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError>;

    /// Versions newest-first, normalized.
    ///
    /// # Errors
    /// Returns a [`ResolverError`] classifying the failure.
    fn list_versions(&self) -> Result<Vec<String>, ResolverError>;

    /// Resolves a requested version, accepting an exact match or a fuzzy
    /// prefix (`"0.2"` matches `"0.2.5"` via `0.2.`).
    ///
    /// # Errors
    /// Returns `NotFound` when nothing matches.
    fn resolve_version(&self, requested: &str) -> Result<VersionInfo, ResolverError> {
        let wanted = normalize_version(requested);
        let versions = self.list_versions()?;
        if let Some(exact) = versions.iter().find(|v| **v == wanted) {
            return Ok(VersionInfo {
                version: exact.clone(),
                tag: exact.clone(),
            });
        }
        let prefix = format!("{wanted}.");
        if let Some(fuzzy) = versions.iter().find(|v| v.starts_with(&prefix)) {
            return Ok(VersionInfo {
                version: fuzzy.clone(),
                tag: fuzzy.clone(),
            });
        }
        Err(ResolverError::not_found(
            self.source_description(),
            format!("version {requested} not found"),
        ))
    }
}

/// Maps a recipe's version section to a concrete provider.
///
/// # Errors
/// Returns `Validation` when the section is missing its source-specific
/// locator, `UnknownSource` is unreachable here because the source enum is
/// closed.
pub fn provider_for<'a>(
    resolver: &'a Resolver,
    spec: &VersionSpec,
) -> Result<Box<dyn VersionProvider + 'a>, ResolverError> {
    let missing = |field: &str| {
        ResolverError::validation(
            spec.source.as_str(),
            format!("version source {:?} requires the '{field}' field", spec.source.as_str()),
        )
    };
    match spec.source {
        VersionSource::GithubReleases => {
            let repo = spec.repo.clone().ok_or_else(|| missing("repo"))?;
            Ok(Box::new(GithubProvider::new(
                resolver,
                repo,
                spec.include_prereleases,
                spec.asset_pattern.clone(),
            )))
        }
        VersionSource::Npm => {
            let package = spec.package.clone().ok_or_else(|| missing("package"))?;
            Ok(Box::new(NpmProvider::new(resolver, package)))
        }
        VersionSource::CratesIo => {
            let package = spec.package.clone().ok_or_else(|| missing("package"))?;
            Ok(Box::new(crates_io::CratesIoProvider::new(resolver, package)))
        }
        VersionSource::Pypi => {
            let package = spec.package.clone().ok_or_else(|| missing("package"))?;
            Ok(Box::new(PypiProvider::new(resolver, package)))
        }
        VersionSource::Rubygems => {
            let package = spec.package.clone().ok_or_else(|| missing("package"))?;
            Ok(Box::new(RubygemsProvider::new(resolver, package)))
        }
        VersionSource::Homebrew => {
            let formula = spec.formula.clone().ok_or_else(|| missing("formula"))?;
            Ok(Box::new(HomebrewProvider::new(resolver, formula)))
        }
        VersionSource::Goproxy => {
            if let Some(module) = spec.module.clone() {
                Ok(Box::new(GoProxyProvider::new(resolver, module)))
            } else if let Some(install_path) = spec.install_path.clone() {
                Ok(Box::new(InferredGoProxyProvider::new(resolver, install_path)))
            } else {
                Err(missing("module"))
            }
        }
        VersionSource::Metacpan => {
            let distribution = spec
                .distribution
                .clone()
                .ok_or_else(|| missing("distribution"))?;
            Ok(Box::new(MetaCpanProvider::new(resolver, distribution)))
        }
        VersionSource::Nixpkgs => Ok(Box::new(NixpkgsProvider::new(spec.version.clone()))),
        VersionSource::NodejsDist => Ok(Box::new(NodejsDistProvider::new(resolver))),
        VersionSource::Static => {
            let version = spec.version.clone().ok_or_else(|| missing("version"))?;
            Ok(Box::new(StaticProvider::new(version)))
        }
    }
}

/// Resolves the version a recipe asks for: the pinned/constrained version
/// when one is declared, otherwise the latest from the source.
///
/// # Errors
/// Returns a [`ResolverError`] classifying the failure.
pub fn resolve(resolver: &Resolver, spec: &VersionSpec) -> Result<VersionInfo, ResolverError> {
    let provider = provider_for(resolver, spec)?;
    match spec.constraint.as_deref() {
        Some(requested) => provider.resolve_version(requested),
        None => provider.resolve_latest(),
    }
}

/// Normalizes an upstream tag to a canonical dotted version: strips a
/// leading `v` or `go`, prefix paths like `kustomize/`, and rewrites
/// `Release_X_Y_Z` forms. Empty input stays empty.
#[must_use]
pub fn normalize_version(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    let tail = match input.rfind('/') {
        Some(idx) => &input[idx + 1..],
        None => input,
    };
    let mut out = match tail.strip_prefix("Release_") {
        Some(rest) => rest.replace('_', "."),
        None => tail.to_string(),
    };
    if let Some(rest) = out.strip_prefix('v') {
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            out = rest.to_string();
        }
    } else if let Some(rest) = out.strip_prefix("go") {
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            out = rest.to_string();
        }
    }
    out
}

/// Whether a string looks like a concrete version (as opposed to a channel
/// name like `latest`).
#[must_use]
pub fn is_valid_version(input: &str) -> bool {
    let normalized = normalize_version(input);
    let Some(first) = normalized.chars().next() else {
        return false;
    };
    first.is_ascii_digit()
        && normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'))
}

/// Numeric dotted comparison; missing segments count as zero, so
/// `1.0 == 1.0.0`. Non-numeric tails break ties lexicographically.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split('.').collect();
    let right: Vec<&str> = b.split('.').collect();
    let len = left.len().max(right.len());
    for i in 0..len {
        let ls = left.get(i).copied().unwrap_or("0");
        let rs = right.get(i).copied().unwrap_or("0");
        let (ln, ltail) = split_numeric(ls);
        let (rn, rtail) = split_numeric(rs);
        match ln.cmp(&rn) {
            Ordering::Equal => {}
            other => return other,
        }
        match ltail.cmp(rtail) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

fn split_numeric(segment: &str) -> (u64, &str) {
    let digits: usize = segment.chars().take_while(char::is_ascii_digit).count();
    let value = segment[..digits].parse().unwrap_or(0);
    (value, &segment[digits..])
}

/// Sorts newest-first. Entries that do not look like versions fall back to
/// plain lexicographic descending order among themselves.
pub fn sort_versions_desc(versions: &mut [String]) {
    versions.sort_by(|a, b| {
        if is_valid_version(a) && is_valid_version(b) {
            compare_versions(b, a)
        } else {
            b.cmp(a)
        }
    });
}
