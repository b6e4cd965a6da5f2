use serde_json::Value;

use super::{sort_versions_desc, Resolver, ResolverError, VersionInfo, VersionProvider};

const SOURCE: &str = "goproxy";

/// Escapes a module path for the Go module proxy: uppercase letters become
/// `!` followed by the lowercase letter.
fn escape_module_path(module: &str) -> String {
    let mut out = String::with_capacity(module.len());
    for ch in module.chars() {
        if ch.is_ascii_uppercase() {
            out.push('!');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn go_tag(version: &str) -> String {
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{version}")
    }
}

impl Resolver {
    pub(crate) fn list_goproxy_versions(&self, module: &str) -> Result<Vec<String>, ResolverError> {
        let url = format!(
            "{}/{}/@v/list",
            self.goproxy_base,
            escape_module_path(module)
        );
        let body = self.get_text(SOURCE, &url)?;
        let mut tags: Vec<String> = body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        sort_versions_desc(&mut tags);
        Ok(tags)
    }

    pub(crate) fn resolve_goproxy_latest(&self, module: &str) -> Result<VersionInfo, ResolverError> {
        let url = format!(
            "{}/{}/@latest",
            self.goproxy_base,
            escape_module_path(module)
        );
        let doc = self.get_json(SOURCE, &url)?;
        let tag = doc
            .get("Version")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ResolverError::parsing(SOURCE, format!("no Version field for module {module}"))
            })?;
        Ok(VersionInfo::from_tag(tag.to_string()))
    }
}

/// Resolves Go module versions from the module proxy. Module versions keep
/// the `v` prefix in tags; the canonical version drops it.
pub struct GoProxyProvider<'a> {
    resolver: &'a Resolver,
    module: String,
}

impl<'a> GoProxyProvider<'a> {
    #[must_use]
    pub fn new(resolver: &'a Resolver, module: String) -> Self {
        Self { resolver, module }
    }
}

impl VersionProvider for GoProxyProvider<'_> {
    fn source_description(&self) -> String {
        format!("proxy.golang.org:{}", self.module)
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        self.resolver.resolve_goproxy_latest(&self.module)
    }

    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        let tags = self.resolver.list_goproxy_versions(&self.module)?;
        Ok(tags.iter().map(|t| VersionInfo::from_tag(t).version).collect())
    }

    fn resolve_version(&self, requested: &str) -> Result<VersionInfo, ResolverError> {
        let wanted = go_tag(requested);
        let tags = self.resolver.list_goproxy_versions(&self.module)?;
        tags.iter()
            .find(|t| **t == wanted)
            .map(VersionInfo::from_tag)
            .ok_or_else(|| {
                ResolverError::not_found(
                    SOURCE,
                    format!("version {requested} not found for module {}", self.module),
                )
            })
    }
}

/// Resolves Go module versions when only an install path is known
/// (`host/owner/repo/cmd/tool`). Tries the full path first, then strips
/// `/cmd/...` and the last path segment until a module answers; the
/// successful path is cached on the resolver for subsequent calls.
pub struct InferredGoProxyProvider<'a> {
    resolver: &'a Resolver,
    install_path: String,
}

impl<'a> InferredGoProxyProvider<'a> {
    #[must_use]
    pub fn new(resolver: &'a Resolver, install_path: String) -> Self {
        Self {
            resolver,
            install_path,
        }
    }

    fn module_path(&self) -> Result<String, ResolverError> {
        if let Some(cached) = self
            .resolver
            .goproxy_paths
            .lock()
            .ok()
            .and_then(|cache| cache.get(&self.install_path).cloned())
        {
            return Ok(cached);
        }

        let mut last_err = None;
        for candidate in extract_module_paths(&self.install_path) {
            match self.resolver.list_goproxy_versions(&candidate) {
                Ok(versions) if !versions.is_empty() => {
                    if let Ok(mut cache) = self.resolver.goproxy_paths.lock() {
                        cache.insert(self.install_path.clone(), candidate.clone());
                    }
                    return Ok(candidate);
                }
                Ok(_) => {}
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ResolverError::not_found(
                SOURCE,
                format!("no module found for install path {}", self.install_path),
            )
        }))
    }
}

/// Candidate module paths to try, in order: the install path itself, the
/// path with `/cmd/...` stripped, and the parent path (for submodules).
fn extract_module_paths(install_path: &str) -> Vec<String> {
    let mut paths = vec![install_path.to_string()];
    if let Some(idx) = install_path.find("/cmd/") {
        paths.push(install_path[..idx].to_string());
    }
    if let Some(last_slash) = install_path.rfind('/') {
        let parent = &install_path[..last_slash];
        if parent.contains('/') && paths.last().map(String::as_str) != Some(parent) {
            paths.push(parent.to_string());
        }
    }
    paths
}

impl VersionProvider for InferredGoProxyProvider<'_> {
    fn source_description(&self) -> String {
        format!("proxy.golang.org:{} (inferred)", self.install_path)
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        let module = self.module_path()?;
        self.resolver.resolve_goproxy_latest(&module)
    }

    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        let module = self.module_path()?;
        let tags = self.resolver.list_goproxy_versions(&module)?;
        Ok(tags.iter().map(|t| VersionInfo::from_tag(t).version).collect())
    }

    fn resolve_version(&self, requested: &str) -> Result<VersionInfo, ResolverError> {
        let module = self.module_path()?;
        GoProxyProvider::new(self.resolver, module).resolve_version(requested)
    }
}
