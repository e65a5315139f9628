//! `SessionManager` - portal login and the live authenticated session.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::cookie::Jar;
use reqwest::{Client, StatusCode, redirect};
use tracing::instrument;
use url::Url;

use crate::error::AuthError;

/// Default portal base URL.
pub const DEFAULT_BASE_URL: &str = "https://elliottowner.com/";

/// Browser User-Agent sent with every request; the portal rejects obvious bots.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Text that only appears on the login page.
pub const LOGIN_PAGE_MARKER: &str = "Homeowner Login";

/// Login form endpoint, relative to the base URL.
const LOGIN_PATH: &str = "index.php";

/// Page the portal redirects to after a successful login.
const LANDING_PAGE: &str = "home.php";

/// Maximum redirect hops per request.
const MAX_REDIRECTS: usize = 10;

/// Default absolute timeout per request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Portal login credentials.
#[derive(Clone)]
pub struct Credentials {
    identity: String,
    secret: String,
}

impl Credentials {
    /// Creates credentials from a login e-mail and password.
    #[must_use]
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    /// Login identity (e-mail).
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Authenticated HTTP client with its own cookie store.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    established_at: DateTime<Utc>,
}

impl Session {
    /// HTTP client carrying the session cookies.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// When the login that produced this session completed.
    #[must_use]
    pub const fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }
}

/// Inspects a login response that did not land on the home page.
///
/// `Ok` means the outcome is ambiguous and is treated as success.
fn classify_login_body(body: &str) -> Result<(), AuthError> {
    if body.contains(LOGIN_PAGE_MARKER) {
        return Err(AuthError::StillOnLoginPage);
    }
    let lower = body.to_lowercase();
    if lower.contains("invalid") || lower.contains("incorrect") {
        return Err(AuthError::Rejected);
    }
    Ok(())
}

/// Connection settings shared by every login.
#[derive(Debug, Clone)]
struct Endpoint {
    base_url: Url,
    user_agent: String,
    timeout: Duration,
}

impl Endpoint {
    /// Builds a fresh client with an empty cookie store and logs in with it.
    #[instrument(skip_all, fields(identity = %credentials.identity()))]
    async fn establish(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let client = Client::builder()
            .cookie_provider(Arc::new(Jar::default()))
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .gzip(true)
            .build()
            .map_err(AuthError::ClientBuild)?;

        let login_url = self.base_url.join(LOGIN_PATH)?;
        let form = [
            ("txtemail", credentials.identity.as_str()),
            ("txtupass", credentials.secret.as_str()),
            ("btn-login", "Log In"),
        ];

        let response = client
            .post(login_url)
            .form(&form)
            .send()
            .await
            .map_err(AuthError::Request)?;

        let status = response.status();
        let final_url = response.url().clone();
        tracing::debug!(%status, url = %final_url, "Login response received");

        if status == StatusCode::OK && final_url.as_str().contains(LANDING_PAGE) {
            tracing::info!("Logged in to portal");
        } else {
            let body = response.text().await.map_err(AuthError::Body)?;
            classify_login_body(&body)?;
            tracing::warn!(
                %status,
                url = %final_url,
                "Login result ambiguous, assuming success"
            );
        }

        Ok(Session {
            client,
            established_at: Utc::now(),
        })
    }
}

/// Owns the credentials and the live portal session.
///
/// Readers take a cheap clone of the current session; re-authentication
/// swaps in a new one. Concurrent re-authentications are not deduplicated
/// and the last to finish wins.
#[allow(clippy::module_name_repetitions)]
pub struct SessionManager {
    endpoint: Endpoint,
    credentials: Credentials,
    live: RwLock<Arc<Session>>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("base_url", &self.endpoint.base_url.as_str())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// Builder for `SessionManager`.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct SessionManagerBuilder {
    credentials: Credentials,
    base_url: Option<Url>,
    user_agent: Option<String>,
    timeout: Option<Duration>,
}

impl SessionManagerBuilder {
    /// Overrides the portal base URL (for wiremock in tests).
    #[must_use]
    pub fn base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Overrides the User-Agent (default: [`USER_AGENT`]).
    #[must_use]
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Sets the per-request timeout (default: 30s).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Logs in and returns a manager holding the resulting session.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the initial login fails.
    pub async fn connect(self) -> Result<SessionManager, AuthError> {
        let mut base_url = match self.base_url {
            Some(url) => url,
            None => Url::parse(DEFAULT_BASE_URL)?,
        };
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let endpoint = Endpoint {
            base_url,
            user_agent: self.user_agent.unwrap_or_else(|| String::from(USER_AGENT)),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        };
        let session = endpoint.establish(&self.credentials).await?;

        Ok(SessionManager {
            endpoint,
            credentials: self.credentials,
            live: RwLock::new(Arc::new(session)),
        })
    }
}

impl SessionManager {
    /// Creates a new builder.
    #[must_use]
    pub const fn builder(credentials: Credentials) -> SessionManagerBuilder {
        SessionManagerBuilder {
            credentials,
            base_url: None,
            user_agent: None,
            timeout: None,
        }
    }

    /// Portal base URL, always ending in `/`.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.endpoint.base_url
    }

    /// Logs in with `credentials` on a fresh cookie store, without touching
    /// the live session.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the login fails.
    pub async fn establish(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        self.endpoint.establish(credentials).await
    }

    /// Returns the live session.
    #[must_use]
    pub fn current(&self) -> Arc<Session> {
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&live)
    }

    /// Logs in again and replaces the live session.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the login fails; the live session is
    /// left as it was.
    pub async fn reauthenticate(&self) -> Result<(), AuthError> {
        let session = self.establish(&self.credentials).await?;
        let replaced = std::mem::replace(
            &mut *self.live.write().unwrap_or_else(PoisonError::into_inner),
            Arc::new(session),
        );
        let age = Utc::now().signed_duration_since(replaced.established_at());
        tracing::info!(
            replaced_age_secs = age.num_seconds(),
            "Portal session replaced"
        );
        Ok(())
    }
}
