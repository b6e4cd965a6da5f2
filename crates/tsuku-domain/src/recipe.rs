use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Heterogeneous action parameters: string keys mapping to scalars, lists,
/// or nested maps. `serde_json::Map` keeps keys sorted, which keeps recipe
/// and plan serialization stable.
pub type Params = serde_json::Map<String, Value>;

/// A declarative description of how to install one tool.
///
/// Recipes are immutable once parsed; the plan generator reads them, the
/// executor never sees them directly (it consumes plans).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Recipe {
    pub metadata: Metadata,
    pub version: VersionSpec,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<Verify>,
}

impl Recipe {
    /// Parses a recipe from TOML text.
    ///
    /// # Errors
    /// Returns an error when the document is not valid TOML or is missing
    /// required fields.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse recipe TOML")
    }

    /// Serializes the recipe back to TOML. The output is deterministic for
    /// a given recipe value, which makes it suitable as the input to the
    /// recipe hash recorded in plans.
    ///
    /// # Errors
    /// Returns an error when a parameter value cannot be represented in TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).context("failed to serialize recipe to TOML")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub homepage: String,
    #[serde(rename = "type", default)]
    pub kind: ToolType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub version_format: VersionFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    #[default]
    Tool,
    Library,
    Ecosystem,
}

impl ToolType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Library => "library",
            Self::Ecosystem => "ecosystem",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionFormat {
    #[default]
    Semver,
    Date,
    String,
}

/// Where versions come from and how to locate the package there.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionSpec {
    pub source: VersionSource,
    /// GitHub `owner/repo` slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Registry package name (npm, crates.io, PyPI, RubyGems).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Go module path for the module proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Go install path (`host/owner/repo/cmd/tool`); the module path is
    /// inferred from it when `module` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<String>,
    /// Homebrew formula name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// CPAN distribution name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<String>,
    /// Literal version for the `static` source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Requested version or version prefix; resolved against the source's
    /// version list when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_prereleases: bool,
    /// Filters GitHub releases to those carrying a matching asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_pattern: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionSource {
    #[serde(rename = "github_releases")]
    GithubReleases,
    #[serde(rename = "npm")]
    Npm,
    #[serde(rename = "crates.io")]
    CratesIo,
    #[serde(rename = "pypi")]
    Pypi,
    #[serde(rename = "rubygems")]
    Rubygems,
    #[serde(rename = "homebrew")]
    Homebrew,
    #[serde(rename = "goproxy")]
    Goproxy,
    #[serde(rename = "metacpan")]
    Metacpan,
    #[serde(rename = "nixpkgs")]
    Nixpkgs,
    #[serde(rename = "nodejs_dist")]
    NodejsDist,
    #[serde(rename = "static")]
    Static,
}

impl VersionSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GithubReleases => "github_releases",
            Self::Npm => "npm",
            Self::CratesIo => "crates.io",
            Self::Pypi => "pypi",
            Self::Rubygems => "rubygems",
            Self::Homebrew => "homebrew",
            Self::Goproxy => "goproxy",
            Self::Metacpan => "metacpan",
            Self::Nixpkgs => "nixpkgs",
            Self::NodejsDist => "nodejs_dist",
            Self::Static => "static",
        }
    }
}

/// One recipe step: an action name, its parameters, and an optional
/// platform gate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<WhenClause>,
}

/// Platform gate for a step. Absent keys always match.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WhenClause {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// Runtime-only condition; plan generation treats it as satisfied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
}

impl WhenClause {
    /// Evaluates the gate against a target platform. `package_manager` is a
    /// runtime concern and is treated as satisfied here.
    #[must_use]
    pub fn matches(&self, os: &str, arch: &str) -> bool {
        if let Some(want) = &self.os {
            if want != os {
                return false;
            }
        }
        if let Some(want) = &self.arch {
            if want != arch {
                return false;
            }
        }
        true
    }
}

/// A patch applied right after the last `extract` step.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
}

/// Post-install verification: run a command, check its exit code and
/// optionally look for a substring in the combined output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Verify {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}
