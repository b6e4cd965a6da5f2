//! Error formatting with actionable suggestions.
//!
//! Any error in an anyhow chain may carry a suggestion (today that is
//! [`ResolverError`]); the first non-empty one found is appended as a
//! `Suggestion:` line by the top-level formatter.

use std::io::Write;

use crate::version::ResolverError;

/// Formats an error chain, appending a suggestion when one is available.
#[must_use]
pub fn format_error(err: &anyhow::Error) -> String {
    let message = format!("{err:#}");
    match extract_suggestion(err) {
        Some(suggestion) => format!("{message}\n\nSuggestion: {suggestion}"),
        None => message,
    }
}

/// Walks the error chain looking for the first non-empty suggestion.
#[must_use]
pub fn extract_suggestion(err: &anyhow::Error) -> Option<String> {
    for cause in err.chain() {
        if let Some(resolver_err) = cause.downcast_ref::<ResolverError>() {
            if let Some(suggestion) = resolver_err.suggestion() {
                if !suggestion.is_empty() {
                    return Some(suggestion.to_string());
                }
            }
        }
    }
    None
}

/// Writes `Error: <formatted>` to the writer, for the CLI boundary.
pub fn fprint(writer: &mut impl Write, err: &anyhow::Error) {
    let _ = writeln!(writer, "Error: {}", format_error(err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn plain_errors_format_without_suggestion() {
        let err = anyhow!("something broke");
        assert_eq!(format_error(&err), "something broke");
    }

    #[test]
    fn suggestion_is_found_through_context_layers() {
        let resolver_err = ResolverError::network("github", "rate limit exceeded")
            .with_suggestion("set the GITHUB_TOKEN environment variable");
        let err = anyhow::Error::from(resolver_err).context("failed to resolve version");

        let formatted = format_error(&err);
        assert!(formatted.contains("failed to resolve version"));
        assert!(formatted.contains("github resolver: rate limit exceeded"));
        assert!(formatted.contains("\n\nSuggestion: set the GITHUB_TOKEN environment variable"));
    }

    #[test]
    fn fprint_prefixes_with_error() {
        let mut out = Vec::new();
        fprint(&mut out, &anyhow!("boom"));
        assert_eq!(String::from_utf8(out).expect("utf8"), "Error: boom\n");
    }

    #[test]
    fn result_context_preserves_suggestion() {
        let result: anyhow::Result<()> =
            Err(ResolverError::network("github", "403").with_suggestion("try a token").into());
        let err = result.context("plan generation failed").unwrap_err();
        assert_eq!(extract_suggestion(&err).as_deref(), Some("try a token"));
    }
}
