use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The on-disk installed-tool state (`state.json`).
///
/// `BTreeMap` keys keep serialization stable across runs so concurrent
/// readers comparing snapshots never see spurious diffs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub installed: BTreeMap<String, ToolState>,
    #[serde(default)]
    pub libs: BTreeMap<String, BTreeMap<String, LibraryState>>,
}

impl State {
    #[must_use]
    pub fn is_installed(&self, tool: &str, version: &str) -> bool {
        self.installed
            .get(tool)
            .is_some_and(|t| t.versions.contains_key(version))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolState {
    pub active_version: String,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionState>,
    /// Binary names exposed through `current/` for the active version.
    #[serde(default)]
    pub binaries: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionState {
    #[serde(default)]
    pub binaries: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub installed_at: OffsetDateTime,
}

/// Libraries are reference-counted by the tool installations that use them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LibraryState {
    #[serde(default)]
    pub used_by: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn is_installed_checks_versions() {
        let mut state = State::default();
        let mut tool = ToolState {
            active_version: "1.0.0".into(),
            ..ToolState::default()
        };
        tool.versions.insert(
            "1.0.0".into(),
            VersionState {
                binaries: vec!["bin/tool-a".into()],
                installed_at: datetime!(2026-01-01 00:00:00 UTC),
            },
        );
        state.installed.insert("tool-a".into(), tool);

        assert!(state.is_installed("tool-a", "1.0.0"));
        assert!(!state.is_installed("tool-a", "2.0.0"));
        assert!(!state.is_installed("tool-b", "1.0.0"));
    }

    #[test]
    fn json_round_trip() {
        let mut state = State::default();
        state
            .libs
            .entry("libyaml".into())
            .or_default()
            .insert("0.2.5".into(), LibraryState {
                used_by: vec!["ruby-3.3.0".into()],
            });

        let text = serde_json::to_string_pretty(&state).expect("encode");
        let back: State = serde_json::from_str(&text).expect("decode");
        assert_eq!(back.libs["libyaml"]["0.2.5"].used_by, vec!["ruby-3.3.0"]);
    }
}
