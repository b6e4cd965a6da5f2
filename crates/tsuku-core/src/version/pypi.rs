use serde_json::Value;

use super::{sort_versions_desc, Resolver, ResolverError, VersionInfo, VersionProvider};

const SOURCE: &str = "pypi";

/// Resolves versions from the PyPI JSON API.
pub struct PypiProvider<'a> {
    resolver: &'a Resolver,
    package: String,
}

impl<'a> PypiProvider<'a> {
    #[must_use]
    pub fn new(resolver: &'a Resolver, package: String) -> Self {
        Self { resolver, package }
    }

    fn fetch(&self) -> Result<Value, ResolverError> {
        let url = format!("{}/pypi/{}/json", self.resolver.pypi_base, self.package);
        self.resolver.get_json(SOURCE, &url)
    }
}

impl VersionProvider for PypiProvider<'_> {
    fn source_description(&self) -> String {
        format!("pypi:{}", self.package)
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        let doc = self.fetch()?;
        let latest = doc
            .get("info")
            .and_then(|info| info.get("version"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ResolverError::parsing(SOURCE, format!("no info.version for {}", self.package))
            })?;
        Ok(VersionInfo::from_tag(latest.to_string()))
    }

    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        let doc = self.fetch()?;
        let releases = doc
            .get("releases")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                ResolverError::parsing(SOURCE, format!("no releases map for {}", self.package))
            })?;
        let mut versions: Vec<String> = releases.keys().cloned().collect();
        sort_versions_desc(&mut versions);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_latest_and_lists_releases() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/pypi/black/json")
            .with_body(
                r#"{"info": {"version": "24.4.2"},
                    "releases": {"24.4.2": [], "24.4.0": [], "23.12.1": []}}"#,
            )
            .create();
        let mut resolver = Resolver::new().expect("resolver");
        resolver.pypi_base = server.url();
        let provider = PypiProvider::new(&resolver, "black".into());

        assert_eq!(provider.resolve_latest().expect("latest").version, "24.4.2");
        assert_eq!(
            provider.list_versions().expect("list"),
            vec!["24.4.2", "24.4.0", "23.12.1"]
        );
    }

    #[test]
    fn fuzzy_resolve_uses_dot_prefix() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/pypi/black/json")
            .with_body(
                r#"{"info": {"version": "24.4.2"},
                    "releases": {"24.4.2": [], "24.40.0": []}}"#,
            )
            .expect_at_least(1)
            .create();
        let mut resolver = Resolver::new().expect("resolver");
        resolver.pypi_base = server.url();
        let provider = PypiProvider::new(&resolver, "black".into());

        // "24.4" must match "24.4.2" via the "24.4." prefix, never "24.40.0".
        let info = provider.resolve_version("24.4").expect("resolve");
        assert_eq!(info.version, "24.4.2");
    }
}
