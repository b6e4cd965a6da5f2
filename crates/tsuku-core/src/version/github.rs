use serde::Deserialize;

use super::{normalize_version, Resolver, ResolverError, VersionInfo, VersionProvider};
use crate::sanitize::sanitize_url;

const SOURCE: &str = "github";

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
}

/// Resolves versions from the GitHub releases API.
///
/// Pre-releases and drafts are filtered unless the recipe opts in, and an
/// optional asset pattern keeps releases that actually ship a matching
/// artifact. `GITHUB_TOKEN` is honored when present; rate-limit exhaustion
/// maps to a network error suggesting one be configured.
pub struct GithubProvider<'a> {
    resolver: &'a Resolver,
    repo: String,
    include_prereleases: bool,
    asset_pattern: Option<String>,
}

impl<'a> GithubProvider<'a> {
    #[must_use]
    pub fn new(
        resolver: &'a Resolver,
        repo: String,
        include_prereleases: bool,
        asset_pattern: Option<String>,
    ) -> Self {
        Self {
            resolver,
            repo,
            include_prereleases,
            asset_pattern,
        }
    }

    fn fetch_releases(&self) -> Result<Vec<Release>, ResolverError> {
        let url = format!(
            "{}/repos/{}/releases?per_page=100",
            self.resolver.github_base, self.repo
        );
        let mut request = self.resolver.client().get(&url);
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.is_empty() {
                request = request.bearer_auth(token);
            }
        }
        let response = request.send().map_err(|err| {
            ResolverError::network(SOURCE, format!("request to {} failed", sanitize_url(&url)))
                .with_cause(err)
        })?;
        let status = response.status().as_u16();
        match status {
            403 | 429 => {
                return Err(ResolverError::network(
                    SOURCE,
                    format!("GitHub API rate limit exceeded listing releases for {}", self.repo),
                )
                .with_suggestion(
                    "set the GITHUB_TOKEN environment variable to raise the API rate limit",
                ));
            }
            404 => {
                return Err(ResolverError::not_found(
                    SOURCE,
                    format!("repository {} has no releases endpoint (404)", self.repo),
                ));
            }
            _ => {}
        }
        if !response.status().is_success() {
            return Err(ResolverError::network(
                SOURCE,
                format!("unexpected status {status} from {}", sanitize_url(&url)),
            ));
        }
        response.json().map_err(|err| {
            ResolverError::parsing(SOURCE, format!("invalid release JSON for {}", self.repo))
                .with_cause(err)
        })
    }

    fn matching_releases(&self) -> Result<Vec<Release>, ResolverError> {
        let releases = self.fetch_releases()?;
        let filtered: Vec<Release> = releases
            .into_iter()
            .filter(|r| !r.draft)
            .filter(|r| self.include_prereleases || !r.prerelease)
            .filter(|r| self.release_has_matching_asset(r))
            .collect();
        if filtered.is_empty() {
            return Err(ResolverError::not_found(
                SOURCE,
                format!("no matching releases found for {}", self.repo),
            ));
        }
        Ok(filtered)
    }

    /// A release qualifies when any asset name contains the pattern with
    /// `{version}` substituted for that release's version.
    fn release_has_matching_asset(&self, release: &Release) -> bool {
        let Some(pattern) = &self.asset_pattern else {
            return true;
        };
        let version = normalize_version(&release.tag_name);
        let concrete = pattern.replace("{version}", &version);
        release.assets.iter().any(|a| a.name.contains(&concrete))
    }
}

impl VersionProvider for GithubProvider<'_> {
    fn source_description(&self) -> String {
        format!("github:{}", self.repo)
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        let releases = self.matching_releases()?;
        // The API returns releases newest first.
        Ok(VersionInfo::from_tag(releases[0].tag_name.clone()))
    }

    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        let releases = self.matching_releases()?;
        Ok(releases
            .iter()
            .map(|r| normalize_version(&r.tag_name))
            .collect())
    }

    fn resolve_version(&self, requested: &str) -> Result<VersionInfo, ResolverError> {
        let wanted = normalize_version(requested);
        let releases = self.matching_releases()?;
        if let Some(release) = releases
            .iter()
            .find(|r| normalize_version(&r.tag_name) == wanted)
        {
            return Ok(VersionInfo::from_tag(release.tag_name.clone()));
        }
        let prefix = format!("{wanted}.");
        if let Some(release) = releases
            .iter()
            .find(|r| normalize_version(&r.tag_name).starts_with(&prefix))
        {
            return Ok(VersionInfo::from_tag(release.tag_name.clone()));
        }
        Err(ResolverError::not_found(
            SOURCE,
            format!("version {requested} not found for {}", self.repo),
        ))
    }
}
