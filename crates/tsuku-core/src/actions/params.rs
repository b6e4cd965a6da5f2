//! Typed accessors and validators for heterogeneous action parameters.
//!
//! Missing or mistyped fields surface as preflight/execute errors, never
//! panics. Every action that accepts paths or executable names routes them
//! through the validators here.

use anyhow::{bail, Result};
use serde_json::Value;
use tsuku_domain::Params;

#[must_use]
pub fn get_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

#[must_use]
pub fn get_string(params: &Params, key: &str) -> Option<String> {
    get_str(params, key).map(str::to_string)
}

#[must_use]
pub fn get_bool(params: &Params, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

#[must_use]
pub fn get_i64(params: &Params, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_i64)
}

/// A list of strings; scalar strings are not promoted.
#[must_use]
pub fn get_string_slice(params: &Params, key: &str) -> Option<Vec<String>> {
    let items = params.get(key)?.as_array()?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(item.as_str()?.to_string());
    }
    Some(out)
}

/// # Errors
/// Returns an error naming the action and the missing parameter.
pub fn require_str<'a>(params: &'a Params, key: &str, action: &str) -> Result<&'a str> {
    match get_str(params, key) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => bail!("{action} action requires the '{key}' parameter"),
    }
}

/// # Errors
/// Returns an error when the list is missing or empty.
pub fn require_string_slice(params: &Params, key: &str, action: &str) -> Result<Vec<String>> {
    match get_string_slice(params, key) {
        Some(values) if !values.is_empty() => Ok(values),
        _ => bail!("{action} action requires the '{key}' parameter with at least one entry"),
    }
}

/// Characters that would let a parameter break out of an argv slot if it
/// ever reached a shell.
#[must_use]
pub fn has_shell_metacharacters(value: &str) -> bool {
    value
        .chars()
        .any(|c| matches!(c, ';' | '&' | '|' | '`' | '$' | '(' | ')' | '<' | '>' | '\n' | '\r'))
}

/// Executable names must be bare file names: no separators, no traversal.
#[must_use]
pub fn is_safe_executable_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
}

/// Relative paths inside the workspace: no traversal, not absolute.
#[must_use]
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return false;
    }
    !path
        .split(['/', '\\'])
        .any(|component| component == ".." || component.is_empty())
}

/// # Errors
/// Returns an error quoting the offending name.
pub fn ensure_safe_executable_names(names: &[String], action: &str) -> Result<()> {
    for name in names {
        if !is_safe_executable_name(name) {
            bail!("invalid executable name {name:?} in {action}: must not contain path separators");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Params {
        json!({
            "url": "https://example.com/a.tar.gz",
            "strip": 2,
            "force": true,
            "binaries": ["tool-a", "tool-b"],
            "mixed": ["tool-a", 3],
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn typed_accessors_return_options() {
        let params = params();
        assert_eq!(get_str(&params, "url"), Some("https://example.com/a.tar.gz"));
        assert_eq!(get_i64(&params, "strip"), Some(2));
        assert_eq!(get_bool(&params, "force"), Some(true));
        assert_eq!(
            get_string_slice(&params, "binaries"),
            Some(vec!["tool-a".to_string(), "tool-b".to_string()])
        );
        assert_eq!(get_string_slice(&params, "mixed"), None);
        assert_eq!(get_str(&params, "missing"), None);
        assert_eq!(get_str(&params, "strip"), None);
    }

    #[test]
    fn require_helpers_name_the_action() {
        let params = params();
        let err = require_str(&params, "dest", "download_file").unwrap_err();
        assert!(err.to_string().contains("download_file"));
        assert!(err.to_string().contains("dest"));
        assert!(require_string_slice(&params, "binaries", "x").is_ok());
    }

    #[test]
    fn shell_metacharacters_are_detected() {
        for bad in ["a;b", "a|b", "a`id`", "a$HOME", "a&&b", "a\nb", "a>(x)"] {
            assert!(has_shell_metacharacters(bad), "expected {bad:?} flagged");
        }
        for good in ["tool-a", "my.package", "@scope/pkg", "a_b-c"] {
            assert!(!has_shell_metacharacters(good), "expected {good:?} clean");
        }
    }

    #[test]
    fn executable_names_reject_separators_and_traversal() {
        for bad in ["", ".", "a/b", "a\\b", "..", "a..b"] {
            assert!(!is_safe_executable_name(bad), "expected {bad:?} rejected");
        }
        assert!(is_safe_executable_name("tool-a"));
    }

    #[test]
    fn relative_paths_stay_inside_the_workspace() {
        assert!(is_safe_relative_path("bin/tool-a"));
        assert!(is_safe_relative_path("nested/dir/file"));
        for bad in ["/etc/passwd", "../up", "a/../b", "a//b", ""] {
            assert!(!is_safe_relative_path(bad), "expected {bad:?} rejected");
        }
    }
}
