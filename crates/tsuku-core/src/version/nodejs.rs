use serde::Deserialize;

use super::{Resolver, ResolverError, VersionInfo, VersionProvider};

const SOURCE: &str = "nodejs_dist";

#[derive(Debug, Deserialize)]
struct DistEntry {
    version: String,
}

/// Resolves Node.js versions from `https://nodejs.org/dist/index.json`.
/// The index is ordered newest first.
pub struct NodejsDistProvider<'a> {
    resolver: &'a Resolver,
}

impl<'a> NodejsDistProvider<'a> {
    #[must_use]
    pub fn new(resolver: &'a Resolver) -> Self {
        Self { resolver }
    }

    fn fetch(&self) -> Result<Vec<DistEntry>, ResolverError> {
        let url = format!("{}/dist/index.json", self.resolver.nodejs_base);
        let doc = self.resolver.get_json(SOURCE, &url)?;
        serde_json::from_value(doc).map_err(|err| {
            ResolverError::parsing(SOURCE, "unexpected dist index payload").with_cause(err)
        })
    }
}

impl VersionProvider for NodejsDistProvider<'_> {
    fn source_description(&self) -> String {
        "nodejs.org/dist".to_string()
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        let entries = self.fetch()?;
        entries
            .first()
            .map(|e| VersionInfo::from_tag(e.version.clone()))
            .ok_or_else(|| ResolverError::not_found(SOURCE, "dist index is empty"))
    }

    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        let entries = self.fetch()?;
        Ok(entries
            .iter()
            .map(|e| VersionInfo::from_tag(e.version.clone()).version)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dist_index() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/dist/index.json")
            .with_body(
                r#"[
                    {"version": "v22.3.0", "lts": false},
                    {"version": "v22.2.0", "lts": false},
                    {"version": "v20.14.0", "lts": "Iron"}
                ]"#,
            )
            .create();
        let mut resolver = Resolver::new().expect("resolver");
        resolver.nodejs_base = server.url();
        let provider = NodejsDistProvider::new(&resolver);

        let info = provider.resolve_latest().expect("latest");
        assert_eq!(info.version, "22.3.0");
        assert_eq!(info.tag, "v22.3.0");
        assert_eq!(
            provider.list_versions().expect("list"),
            vec!["22.3.0", "22.2.0", "20.14.0"]
        );
    }
}
