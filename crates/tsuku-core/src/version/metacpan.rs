use serde_json::Value;

use super::{sort_versions_desc, Resolver, ResolverError, VersionInfo, VersionProvider};

const SOURCE: &str = "metacpan";

/// Resolves versions for CPAN distributions via the MetaCPAN API.
pub struct MetaCpanProvider<'a> {
    resolver: &'a Resolver,
    distribution: String,
}

impl<'a> MetaCpanProvider<'a> {
    #[must_use]
    pub fn new(resolver: &'a Resolver, distribution: String) -> Self {
        Self {
            resolver,
            distribution,
        }
    }
}

/// MetaCPAN version fields are sometimes JSON numbers; both forms are
/// accepted.
fn version_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl VersionProvider for MetaCpanProvider<'_> {
    fn source_description(&self) -> String {
        format!("metacpan:{}", self.distribution)
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        let url = format!(
            "{}/v1/release/{}",
            self.resolver.metacpan_base, self.distribution
        );
        let doc = self.resolver.get_json(SOURCE, &url)?;
        let version = doc.get("version").and_then(version_field).ok_or_else(|| {
            ResolverError::parsing(
                SOURCE,
                format!("no version field for distribution {}", self.distribution),
            )
        })?;
        Ok(VersionInfo {
            version: version.clone(),
            tag: version,
        })
    }

    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        let url = format!(
            "{}/v1/release/_search?q=distribution:{}&fields=version&sort=date:desc&size=100",
            self.resolver.metacpan_base, self.distribution
        );
        let doc = self.resolver.get_json(SOURCE, &url)?;
        let hits = doc
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ResolverError::parsing(
                    SOURCE,
                    format!("unexpected search payload for {}", self.distribution),
                )
            })?;
        let mut versions: Vec<String> = hits
            .iter()
            .filter_map(|hit| hit.get("fields").and_then(|f| f.get("version")))
            .filter_map(version_field)
            .collect();
        versions.dedup();
        sort_versions_desc(&mut versions);
        if versions.is_empty() {
            return Err(ResolverError::not_found(
                SOURCE,
                format!("no versions for distribution {}", self.distribution),
            ));
        }
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_latest_release() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/v1/release/App-Ack")
            .with_body(r#"{"version": "3.7.0"}"#)
            .create();
        let mut resolver = Resolver::new().expect("resolver");
        resolver.metacpan_base = server.url();
        let provider = MetaCpanProvider::new(&resolver, "App-Ack".into());

        assert_eq!(provider.resolve_latest().expect("latest").version, "3.7.0");
    }

    #[test]
    fn list_handles_numeric_version_fields() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock(
                "GET",
                "/v1/release/_search?q=distribution:App-Ack&fields=version&sort=date:desc&size=100",
            )
            .with_body(
                r#"{"hits": {"hits": [
                    {"fields": {"version": "3.7.0"}},
                    {"fields": {"version": 3.6}},
                    {"fields": {"version": "3.5.0"}}
                ]}}"#,
            )
            .create();
        let mut resolver = Resolver::new().expect("resolver");
        resolver.metacpan_base = server.url();
        let provider = MetaCpanProvider::new(&resolver, "App-Ack".into());

        let versions = provider.list_versions().expect("list");
        assert_eq!(versions, vec!["3.7.0", "3.6", "3.5.0"]);
    }
}
