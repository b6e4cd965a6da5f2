use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::recipe::Params;

/// Bumped when the plan schema changes incompatibly.
pub const PLAN_FORMAT_VERSION: u32 = 1;

/// A fully-resolved, self-contained expansion of a recipe.
///
/// Plans pin URLs, checksums, and the ordered primitive steps so an
/// installation can be replayed bit-identically. Composite actions never
/// appear here; they are decomposed during generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallationPlan {
    pub format_version: u32,
    pub tool: String,
    pub version: String,
    pub platform: Platform,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    /// SHA-256 of the recipe's TOML serialization.
    pub recipe_hash: String,
    /// `"registry"`, a file path, or `"dependency"` for prepended subplans.
    pub recipe_source: String,
    /// AND of every step's deterministic bit.
    pub deterministic: bool,
    pub recipe_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<PlanVerify>,
    #[serde(default)]
    pub steps: Vec<ResolvedStep>,
}

impl InstallationPlan {
    /// # Errors
    /// Returns an error when the document is not a valid plan.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse installation plan")
    }

    /// # Errors
    /// Returns an error when a step parameter cannot be represented in TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).context("failed to serialize installation plan")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanVerify {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// One primitive step inside a plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolvedStep {
    pub action: String,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Whether the step's effect is a pure function of its inputs and the
    /// pre-downloaded asset cache.
    pub evaluable: bool,
    pub deterministic: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn sample_plan() -> InstallationPlan {
        let mut params = Params::new();
        params.insert("url".into(), json!("https://example.com/a.tar.gz"));
        params.insert("dest".into(), json!("a.tar.gz"));
        InstallationPlan {
            format_version: PLAN_FORMAT_VERSION,
            tool: "tool-a".into(),
            version: "1.2.3".into(),
            platform: Platform {
                os: "linux".into(),
                arch: "amd64".into(),
            },
            generated_at: datetime!(2026-01-15 12:00:00 UTC),
            recipe_hash: "ab".repeat(32),
            recipe_source: "registry".into(),
            deterministic: true,
            recipe_type: "tool".into(),
            verify: Some(PlanVerify {
                command: "tool-a --version".into(),
                pattern: Some("tool-a".into()),
                exit_code: None,
            }),
            steps: vec![ResolvedStep {
                action: "download_file".into(),
                params,
                url: Some("https://example.com/a.tar.gz".into()),
                checksum: Some(format!("sha256:{}", "0".repeat(64))),
                size: Some(1024),
                evaluable: true,
                deterministic: true,
            }],
        }
    }

    #[test]
    fn toml_round_trip_preserves_steps() {
        let plan = sample_plan();
        let text = plan.to_toml().expect("serialize");
        let back = InstallationPlan::from_toml(&text).expect("parse");
        assert_eq!(back.format_version, PLAN_FORMAT_VERSION);
        assert_eq!(back.steps.len(), 1);
        assert_eq!(back.steps[0].action, "download_file");
        assert_eq!(back.steps[0].size, Some(1024));
        assert_eq!(back.generated_at, plan.generated_at);
        assert!(back.deterministic);
    }

    #[test]
    fn serialization_is_deterministic() {
        let plan = sample_plan();
        let first = plan.to_toml().expect("serialize");
        let second = plan.to_toml().expect("serialize again");
        assert_eq!(first, second);
    }
}
