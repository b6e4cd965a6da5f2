use serde::Deserialize;

use super::{sort_versions_desc, Resolver, ResolverError, VersionInfo, VersionProvider};

const SOURCE: &str = "crates.io";

#[derive(Debug, Deserialize)]
struct CrateResponse {
    #[serde(rename = "crate")]
    krate: CrateInfo,
    #[serde(default)]
    versions: Vec<CrateVersion>,
}

#[derive(Debug, Deserialize)]
struct CrateInfo {
    #[serde(default)]
    max_stable_version: Option<String>,
    #[serde(default)]
    max_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrateVersion {
    num: String,
    #[serde(default)]
    yanked: bool,
}

/// Resolves versions from the crates.io API. Yanked versions never appear.
pub struct CratesIoProvider<'a> {
    resolver: &'a Resolver,
    package: String,
}

impl<'a> CratesIoProvider<'a> {
    #[must_use]
    pub fn new(resolver: &'a Resolver, package: String) -> Self {
        Self { resolver, package }
    }

    fn fetch(&self) -> Result<CrateResponse, ResolverError> {
        let url = format!(
            "{}/api/v1/crates/{}",
            self.resolver.crates_io_base, self.package
        );
        let doc = self.resolver.get_json(SOURCE, &url)?;
        serde_json::from_value(doc).map_err(|err| {
            ResolverError::parsing(SOURCE, format!("unexpected payload for crate {}", self.package))
                .with_cause(err)
        })
    }
}

impl VersionProvider for CratesIoProvider<'_> {
    fn source_description(&self) -> String {
        format!("crates.io:{}", self.package)
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        let response = self.fetch()?;
        let latest = response
            .krate
            .max_stable_version
            .or(response.krate.max_version)
            .ok_or_else(|| {
                ResolverError::parsing(
                    SOURCE,
                    format!("crate {} reports no version", self.package),
                )
            })?;
        Ok(VersionInfo::from_tag(latest))
    }

    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        let response = self.fetch()?;
        let mut versions: Vec<String> = response
            .versions
            .into_iter()
            .filter(|v| !v.yanked)
            .map(|v| v.num)
            .collect();
        sort_versions_desc(&mut versions);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "crate": { "max_stable_version": "0.8.5", "max_version": "0.9.0-alpha.1" },
        "versions": [
            {"num": "0.9.0-alpha.1", "yanked": false},
            {"num": "0.8.5", "yanked": false},
            {"num": "0.8.4", "yanked": true},
            {"num": "0.8.3", "yanked": false}
        ]
    }"#;

    #[test]
    fn latest_prefers_stable_and_list_drops_yanked() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/api/v1/crates/rand")
            .with_body(PAYLOAD)
            .create();
        let mut resolver = Resolver::new().expect("resolver");
        resolver.crates_io_base = server.url();
        let provider = CratesIoProvider::new(&resolver, "rand".into());

        assert_eq!(provider.resolve_latest().expect("latest").version, "0.8.5");
        let versions = provider.list_versions().expect("list");
        assert!(!versions.contains(&"0.8.4".to_string()));
        assert_eq!(versions[0], "0.9.0-alpha.1");
    }

    #[test]
    fn missing_crate_is_not_found() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/api/v1/crates/nope")
            .with_status(404)
            .create();
        let mut resolver = Resolver::new().expect("resolver");
        resolver.crates_io_base = server.url();
        let provider = CratesIoProvider::new(&resolver, "nope".into());

        let err = provider.resolve_latest().err().expect("error");
        assert_eq!(err.kind, super::super::ErrorKind::NotFound);
    }
}
