use serde::Deserialize;

use super::{sort_versions_desc, Resolver, ResolverError, VersionInfo, VersionProvider};

const SOURCE: &str = "rubygems";

#[derive(Debug, Deserialize)]
struct GemVersion {
    number: String,
    #[serde(default)]
    prerelease: bool,
}

/// Resolves versions from the RubyGems API.
pub struct RubygemsProvider<'a> {
    resolver: &'a Resolver,
    package: String,
}

impl<'a> RubygemsProvider<'a> {
    #[must_use]
    pub fn new(resolver: &'a Resolver, package: String) -> Self {
        Self { resolver, package }
    }

    fn fetch(&self) -> Result<Vec<GemVersion>, ResolverError> {
        let url = format!(
            "{}/api/v1/versions/{}.json",
            self.resolver.rubygems_base, self.package
        );
        let doc = self.resolver.get_json(SOURCE, &url)?;
        serde_json::from_value(doc).map_err(|err| {
            ResolverError::parsing(SOURCE, format!("unexpected payload for gem {}", self.package))
                .with_cause(err)
        })
    }
}

impl VersionProvider for RubygemsProvider<'_> {
    fn source_description(&self) -> String {
        format!("rubygems:{}", self.package)
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        let versions = self.list_versions()?;
        versions.first().map(VersionInfo::from_tag).ok_or_else(|| {
            ResolverError::not_found(SOURCE, format!("no versions for gem {}", self.package))
        })
    }

    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        let mut versions: Vec<String> = self
            .fetch()?
            .into_iter()
            .filter(|v| !v.prerelease)
            .map(|v| v.number)
            .collect();
        sort_versions_desc(&mut versions);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_stable_versions_newest_first() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/api/v1/versions/rails.json")
            .with_body(
                r#"[
                    {"number": "7.1.0", "prerelease": false},
                    {"number": "7.2.0.beta1", "prerelease": true},
                    {"number": "7.1.3", "prerelease": false}
                ]"#,
            )
            .create();
        let mut resolver = Resolver::new().expect("resolver");
        resolver.rubygems_base = server.url();
        let provider = RubygemsProvider::new(&resolver, "rails".into());

        assert_eq!(
            provider.list_versions().expect("list"),
            vec!["7.1.3", "7.1.0"]
        );
        assert_eq!(provider.resolve_latest().expect("latest").version, "7.1.3");
    }
}
