//! Log-level resolution: flags beat environment variables, and within each
//! group debug beats verbose beats quiet. The default is WARN.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

/// Truthy env values are `1 | true | yes | on`, case-insensitive.
fn truthy(value: Option<String>) -> bool {
    value.is_some_and(|v| tsuku_core::config::env_truthy(&v))
}

/// Precedence: `--debug` > `--verbose` > `--quiet` > `TSUKU_DEBUG` >
/// `TSUKU_VERBOSE` > `TSUKU_QUIET` > WARN.
pub fn resolve_log_level(
    quiet: bool,
    verbose: bool,
    debug: bool,
    env: impl Fn(&str) -> Option<String>,
) -> LogLevel {
    if debug {
        return LogLevel::Debug;
    }
    if verbose {
        return LogLevel::Info;
    }
    if quiet {
        return LogLevel::Error;
    }
    if truthy(env("TSUKU_DEBUG")) {
        return LogLevel::Debug;
    }
    if truthy(env("TSUKU_VERBOSE")) {
        return LogLevel::Info;
    }
    if truthy(env("TSUKU_QUIET")) {
        return LogLevel::Error;
    }
    LogLevel::Warn
}
