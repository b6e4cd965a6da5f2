#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// A throwaway `$TSUKU_HOME` plus a command builder pinned to it.
pub struct TestHome {
    pub dir: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn tsuku(&self) -> Command {
        let mut cmd = Command::cargo_bin("tsuku").expect("tsuku binary");
        cmd.env("TSUKU_HOME", self.dir.path());
        cmd.env("TSUKU_NO_TELEMETRY", "1");
        cmd.env_remove("TSUKU_DEBUG");
        cmd.env_remove("TSUKU_VERBOSE");
        cmd.env_remove("TSUKU_QUIET");
        cmd
    }

    /// Writes a recipe file outside the registry and returns its path.
    pub fn write_recipe(&self, file_name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(file_name);
        std::fs::write(&path, contents).expect("write recipe");
        path
    }
}

/// Offline-safe recipe: a pinned version and shell steps that stage one
/// executable into the install tree.
pub fn offline_recipe(name: &str, version: &str) -> String {
    format!(
        r#"[metadata]
name = "{name}"
description = "offline fixture"

[version]
source = "static"
version = "{version}"

[[steps]]
action = "run_shell"
[steps.params]
command = "mkdir -p \"$TSUKU_INSTALL_DIR/bin\" && printf '#!/bin/sh\necho {name} {version}\n' > \"$TSUKU_INSTALL_DIR/bin/{name}\" && chmod 755 \"$TSUKU_INSTALL_DIR/bin/{name}\""

[verify]
command = "{name}"
pattern = "{name}"
"#
    )
}
