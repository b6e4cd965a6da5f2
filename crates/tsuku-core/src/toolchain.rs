//! Maps tool/ecosystem names onto the host binaries that prove they are
//! available, with install hints for the error path.

use anyhow::{bail, Result};

pub struct ToolchainInfo {
    /// Executable probed on PATH.
    pub binary: &'static str,
    /// Human-readable toolchain name.
    pub name: &'static str,
    pub language: &'static str,
    /// Recipe that installs this toolchain.
    pub recipe: &'static str,
}

const TOOLCHAINS: &[(&str, ToolchainInfo)] = &[
    (
        "rust",
        ToolchainInfo {
            binary: "cargo",
            name: "Cargo",
            language: "Rust",
            recipe: "rust",
        },
    ),
    (
        "ruby",
        ToolchainInfo {
            binary: "gem",
            name: "gem",
            language: "Ruby",
            recipe: "ruby",
        },
    ),
    (
        "python-standalone",
        ToolchainInfo {
            binary: "python3",
            name: "Python",
            language: "Python",
            recipe: "python-standalone",
        },
    ),
    (
        "nodejs",
        ToolchainInfo {
            binary: "node",
            name: "Node.js",
            language: "JavaScript",
            recipe: "nodejs",
        },
    ),
    (
        "go",
        ToolchainInfo {
            binary: "go",
            name: "Go",
            language: "Go",
            recipe: "go",
        },
    ),
    (
        "nix",
        ToolchainInfo {
            binary: "nix",
            name: "Nix",
            language: "Nix",
            recipe: "nix-portable",
        },
    ),
];

#[must_use]
pub fn info_for(tool: &str) -> Option<&'static ToolchainInfo> {
    TOOLCHAINS
        .iter()
        .find(|(name, _)| *name == tool)
        .map(|(_, info)| info)
}

/// The binary that proves a dependency is usable; falls back to the
/// dependency name itself for tools outside the table.
#[must_use]
pub fn binary_for(tool: &str) -> &str {
    match info_for(tool) {
        Some(info) => info.binary,
        None => tool,
    }
}

#[must_use]
pub fn is_available(tool: &str) -> bool {
    which::which(binary_for(tool)).is_ok()
}

/// # Errors
/// Returns an error naming the missing toolchain and how to install it.
pub fn check_available(tool: &str) -> Result<()> {
    if is_available(tool) {
        return Ok(());
    }
    match info_for(tool) {
        Some(info) => bail!(
            "{} is required but '{}' was not found on PATH. Install {} or run: tsuku install {}",
            info.name,
            info.binary,
            info.language,
            info.recipe
        ),
        None => bail!("required tool '{tool}' was not found on PATH (try: tsuku install {tool})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tools_map_to_probe_binaries() {
        assert_eq!(binary_for("rust"), "cargo");
        assert_eq!(binary_for("ruby"), "gem");
        assert_eq!(binary_for("nodejs"), "node");
        assert_eq!(binary_for("python-standalone"), "python3");
    }

    #[test]
    fn unknown_tools_probe_their_own_name() {
        assert_eq!(binary_for("jq"), "jq");
    }

    #[test]
    fn missing_toolchain_error_names_the_recipe() {
        let err = check_available("definitely-not-a-real-binary-name")
            .expect_err("expected missing tool");
        assert!(err.to_string().contains("tsuku install"));
    }
}
