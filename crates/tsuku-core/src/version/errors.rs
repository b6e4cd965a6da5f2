/// Classification of resolver failures. A taxonomy, not a per-source type:
/// every provider maps its failures onto these kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    NotFound,
    Parsing,
    Validation,
    UnknownSource,
    NotSupported,
}

/// Error produced by version resolution, carrying the source name, an
/// optional cause, and an optional actionable suggestion surfaced by the
/// top-level error formatter.
#[derive(Debug, thiserror::Error)]
#[error("{source_name} resolver: {message}")]
pub struct ResolverError {
    pub kind: ErrorKind,
    source_name: String,
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    suggestion: Option<String>,
}

impl ResolverError {
    #[must_use]
    pub fn new(kind: ErrorKind, source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_name: source_name.into(),
            message: message.into(),
            cause: None,
            suggestion: None,
        }
    }

    #[must_use]
    pub fn network(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, source_name, message)
    }

    #[must_use]
    pub fn not_found(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, source_name, message)
    }

    #[must_use]
    pub fn parsing(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parsing, source_name, message)
    }

    #[must_use]
    pub fn validation(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, source_name, message)
    }

    #[must_use]
    pub fn with_cause(
        mut self,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        self.cause = Some(cause.into());
        self
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Actionable remediation text, when the failure has one (for example a
    /// GitHub rate limit pointing at `GITHUB_TOKEN`).
    #[must_use]
    pub fn suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_source_and_message() {
        let err = ResolverError::network("github", "connection failed");
        assert_eq!(err.to_string(), "github resolver: connection failed");
    }

    #[test]
    fn cause_is_exposed_through_source() {
        let err = ResolverError::network("github", "connection failed")
            .with_cause(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"));
        let cause = std::error::Error::source(&err).expect("cause");
        assert_eq!(cause.to_string(), "timeout");
    }

    #[test]
    fn suggestion_defaults_to_none() {
        let err = ResolverError::not_found("npm", "package not found");
        assert!(err.suggestion().is_none());
        let err = err.with_suggestion("check the package name");
        assert_eq!(err.suggestion(), Some("check the package name"));
    }

    #[test]
    fn kinds_are_distinct() {
        let kinds = [
            ErrorKind::Network,
            ErrorKind::NotFound,
            ErrorKind::Parsing,
            ErrorKind::Validation,
            ErrorKind::UnknownSource,
            ErrorKind::NotSupported,
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in kinds.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
