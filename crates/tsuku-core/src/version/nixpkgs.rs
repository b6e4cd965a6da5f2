use super::{ResolverError, VersionInfo, VersionProvider};

const SOURCE: &str = "nixpkgs";

/// Whether a string is an acceptable nixpkgs channel version: the literal
/// `unstable`, or a numeric `YY.MM[.patch]` form. Anything else (shell
/// metacharacters, traversal, free text) is rejected before it can reach a
/// flake reference.
#[must_use]
pub fn is_valid_nixpkgs_version(version: &str) -> bool {
    if version == "unstable" {
        return true;
    }
    if version.len() < 4 || version.len() > 10 {
        return false;
    }
    let mut saw_digit = false;
    let mut saw_dot = false;
    for ch in version.chars() {
        match ch {
            '0'..='9' => saw_digit = true,
            '.' => saw_dot = true,
            _ => return false,
        }
    }
    saw_digit && saw_dot
}

/// Versions for nixpkgs are channels pinned by the recipe, not discovered
/// from a registry; the provider validates the pin and echoes it back.
pub struct NixpkgsProvider {
    channel: String,
}

impl NixpkgsProvider {
    #[must_use]
    pub fn new(channel: Option<String>) -> Self {
        Self {
            channel: channel.unwrap_or_else(|| "unstable".to_string()),
        }
    }
}

impl VersionProvider for NixpkgsProvider {
    fn source_description(&self) -> String {
        format!("nixpkgs:{}", self.channel)
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        if !is_valid_nixpkgs_version(&self.channel) {
            return Err(ResolverError::validation(
                SOURCE,
                format!("invalid nixpkgs channel version {:?}", self.channel),
            ));
        }
        Ok(VersionInfo {
            version: self.channel.clone(),
            tag: self.channel.clone(),
        })
    }

    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        self.resolve_latest().map(|info| vec![info.version])
    }
}
