use serde::Deserialize;

use super::{Resolver, ResolverError, VersionInfo, VersionProvider};

const SOURCE: &str = "homebrew";

#[derive(Debug, Deserialize)]
pub(crate) struct Formula {
    pub(crate) versions: FormulaVersions,
    #[serde(default)]
    pub(crate) versioned_formulae: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FormulaVersions {
    #[serde(default)]
    pub(crate) stable: Option<String>,
}

fn valid_formula_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '@' | '.' | '+'))
}

impl Resolver {
    pub(crate) fn fetch_formula(&self, formula: &str) -> Result<Formula, ResolverError> {
        if !valid_formula_name(formula) {
            return Err(ResolverError::validation(
                SOURCE,
                format!("invalid formula name {formula:?}"),
            ));
        }
        let url = format!("{}/api/formula/{}.json", self.homebrew_base, formula);
        let doc = self.get_json(SOURCE, &url)?;
        serde_json::from_value(doc).map_err(|err| {
            ResolverError::parsing(SOURCE, format!("unexpected payload for formula {formula}"))
                .with_cause(err)
        })
    }
}

/// Resolves versions from the Homebrew formulae API.
///
/// Homebrew only exposes the current stable version plus versioned-formula
/// siblings (`openssl@3.0`), not historical versions.
pub struct HomebrewProvider<'a> {
    resolver: &'a Resolver,
    formula: String,
}

impl<'a> HomebrewProvider<'a> {
    #[must_use]
    pub fn new(resolver: &'a Resolver, formula: String) -> Self {
        Self { resolver, formula }
    }
}

impl VersionProvider for HomebrewProvider<'_> {
    fn source_description(&self) -> String {
        format!("homebrew:{}", self.formula)
    }

    fn resolve_latest(&self) -> Result<VersionInfo, ResolverError> {
        let formula = self.resolver.fetch_formula(&self.formula)?;
        let stable = formula
            .versions
            .stable
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ResolverError::not_found(
                    SOURCE,
                    format!("formula {} has no stable version", self.formula),
                )
            })?;
        Ok(VersionInfo {
            version: stable.clone(),
            tag: stable,
        })
    }

    /// Stable version first, then the versions carried in the names of
    /// versioned-formula siblings.
    fn list_versions(&self) -> Result<Vec<String>, ResolverError> {
        let formula = self.resolver.fetch_formula(&self.formula)?;
        let mut versions = Vec::new();
        if let Some(stable) = formula.versions.stable.filter(|v| !v.is_empty()) {
            versions.push(stable);
        }
        for sibling in &formula.versioned_formulae {
            if let Some((_, version)) = sibling.split_once('@') {
                if !version.is_empty() {
                    versions.push(version.to_string());
                }
            }
        }
        if versions.is_empty() {
            return Err(ResolverError::not_found(
                SOURCE,
                format!("formula {} has no versions", self.formula),
            ));
        }
        Ok(versions)
    }
}
