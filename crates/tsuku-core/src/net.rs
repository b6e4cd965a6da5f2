use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::redirect;

pub const USER_AGENT: &str = concat!("tsuku/", env!("CARGO_PKG_VERSION"));

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 10;

/// Rejects any URL that is not `https://` before a socket is opened.
///
/// # Errors
/// Returns an error for unparseable URLs and for any non-HTTPS scheme.
pub fn ensure_https(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw).with_context(|| format!("invalid URL {raw:?}"))?;
    if parsed.scheme() != "https" {
        bail!("refusing non-HTTPS URL {raw:?}: only https:// downloads are allowed");
    }
    Ok(())
}

/// Builds the shared blocking HTTP client: pinned user agent, request
/// timeout, and a redirect policy that refuses to leave HTTPS.
///
/// # Errors
/// Returns an error when the TLS backend cannot be initialized.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .redirect(redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            // The first hop is validated by callers; redirects must also
            // stay on HTTPS.
            if attempt.url().scheme() != "https" {
                return attempt.error("redirect left HTTPS");
            }
            attempt.follow()
        }))
        .build()
        .context("failed to build HTTP client")
}

/// Client variant for registry endpoints whose base URL is overridden in
/// tests; follows the default redirect policy so local mock servers work.
///
/// # Errors
/// Returns an error when the TLS backend cannot be initialized.
pub fn registry_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}
