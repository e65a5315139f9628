//! Error types for the portal client.

use thiserror::Error;

/// Login failure.
#[derive(Debug, Error)]
#[allow(clippy::module_name_repetitions)]
pub enum AuthError {
    /// The response after submitting the form was the login page again.
    #[error("login failed: still on the login page, check credentials")]
    StillOnLoginPage,
    /// The portal reported invalid or incorrect credentials.
    #[error("login rejected: portal reported invalid credentials")]
    Rejected,
    /// The base URL could not be joined with the login path.
    #[error("invalid portal URL")]
    Url(#[from] url::ParseError),
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client")]
    ClientBuild(#[source] reqwest::Error),
    /// The login form could not be submitted.
    #[error("failed to submit login form")]
    Request(#[source] reqwest::Error),
    /// The login response body could not be read.
    #[error("failed to read login response")]
    Body(#[source] reqwest::Error),
}

/// Failure to pull the event list out of a calendar page.
#[derive(Debug, Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ExtractError {
    /// The page carries no `defaultEvents` literal.
    #[error("could not find defaultEvents in calendar page")]
    NotFound,
    /// The literal was found but did not parse after rewriting.
    #[error("failed to parse rewritten events literal (len={})", .rewritten.len())]
    Malformed {
        /// The literal after rewriting, as handed to the JSON parser.
        rewritten: String,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },
}

/// Failure to refresh one year.
#[derive(Debug, Error)]
#[allow(clippy::module_name_repetitions)]
pub enum FetchError {
    /// Network or gateway failures outlasted the retry budget.
    #[error("upstream unavailable after {attempts} attempts: {reason}")]
    Transient {
        /// Attempts made.
        attempts: u32,
        /// Last observed failure.
        reason: String,
    },
    /// The session kept expiring and could not be restored.
    #[error("session expired and could not be restored after {attempts} attempts")]
    SessionExpired {
        /// Attempts made.
        attempts: u32,
        /// Last re-authentication failure, if re-authentication itself failed.
        #[source]
        reauth: Option<AuthError>,
    },
    /// The portal answered with a status that retrying will not fix.
    #[error("unexpected status code: {status}")]
    Fatal {
        /// HTTP status code.
        status: u16,
    },
    /// The calendar page was fetched but its events could not be extracted.
    #[error("failed to extract events")]
    Extract(#[from] ExtractError),
}
