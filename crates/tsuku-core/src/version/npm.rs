use serde_json::Value;

use super::{sort_versions_desc, Resolver, ResolverError, VersionInfo, VersionProvider};

const SOURCE: &str = "npm";

/// Resolves versions from the npm registry metadata document.
pub struct NpmProvider<'a> {
    resolver: &'a Resolver,
    package: String,
}

impl<'a> NpmProvider<'a> {
    #[must_use]
    pub fn new(resolver: &'a Resolver, package: String) -> Self {
        Self { resolver, package }
    }

    fn fetch(&self) -> Result<Value, ResolverError> {
        let url = format!("{}/{}", self.resolver.npm_base, self.package);
        self.resolver.get_json(SOURCE, &url)
    }
}

pub(super) fn parse_latest(doc: &Value, package: &str) -> Result<String, ResolverError> {
    doc.get("dist-tags")
        .and_then(|tags| tags.get("latest"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ResolverError::parsing(SOURCE, format!("no dist-tags.latest for package {package}"))
        })
}

pub(super) fn parse_versions(doc: &Value, package: &str) -> Result<Vec<String>, ResolverError> {
    let versions = doc
        .get("versions")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            ResolverError::parsing(SOURCE, format!("no versions map for package {package}"))
        })?;
    let mut out: Vec<String> = versions.keys().cloned().collect();
    sort_versions_desc(&mut out);
    Ok(out)
}

impl VersionProvider for NpmProvider<'_> {
    fn source_description(&self) -> String {
        format!("npm:{}", self.package)
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        let doc = self.fetch()?;
        let latest = parse_latest(&doc, &self.package)?;
        Ok(VersionInfo::from_tag(latest))
    }

    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        let doc = self.fetch()?;
        parse_versions(&doc, &self.package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_latest_and_sorted_versions() {
        let doc = json!({
            "dist-tags": { "latest": "5.0.1" },
            "versions": { "4.9.0": {}, "5.0.1": {}, "5.0.0": {} },
        });
        assert_eq!(parse_latest(&doc, "serve").expect("latest"), "5.0.1");
        assert_eq!(
            parse_versions(&doc, "serve").expect("versions"),
            vec!["5.0.1", "5.0.0", "4.9.0"]
        );
    }

    #[test]
    fn missing_fields_are_parsing_errors() {
        let doc = json!({});
        assert!(parse_latest(&doc, "serve").is_err());
        assert!(parse_versions(&doc, "serve").is_err());
    }

    #[test]
    fn provider_fetches_from_registry() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/serve")
            .with_body(r#"{"dist-tags": {"latest": "14.2.3"}, "versions": {"14.2.3": {}, "14.2.1": {}}}"#)
            .create();
        let mut resolver = Resolver::new().expect("resolver");
        resolver.npm_base = server.url();
        let provider = NpmProvider::new(&resolver, "serve".into());

        assert_eq!(provider.resolve_latest().expect("latest").version, "14.2.3");
        assert_eq!(
            provider.list_versions().expect("list"),
            vec!["14.2.3", "14.2.1"]
        );
    }
}
