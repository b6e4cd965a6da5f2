use super::{ResolverError, VersionInfo, VersionProvider};

const SOURCE: &str = "static";

/// The recipe pins a literal version; no network call is ever made.
pub struct StaticProvider {
    version: String,
}

impl StaticProvider {
    #[must_use]
    pub fn new(version: String) -> Self {
        Self { version }
    }
}

impl VersionProvider for StaticProvider {
    fn source_description(&self) -> String {
        format!("static:{}", self.version)
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        Ok(VersionInfo {
            version: self.version.clone(),
            tag: self.version.clone(),
        })
    }

    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        Ok(vec![self.version.clone()])
    }

    fn resolve_version(&self, requested: &str) -> Result<VersionInfo, ResolverError> {
        if requested == self.version || self.version.starts_with(&format!("{requested}.")) {
            return self.resolve_latest();
        }
        Err(ResolverError::not_found(
            SOURCE,
            format!(
                "requested version {requested} does not match the pinned version {}",
                self.version
            ),
        ))
    }
}
