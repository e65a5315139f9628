//! `CalendarFetcher` - per-year calendar refresh with retry and re-login.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ownercal_cache::BookingCache;
use reqwest::StatusCode;
use tracing::instrument;
use url::Url;

use crate::error::{AuthError, FetchError};
use crate::extract::{EventExtractor, LiteralRewriteExtractor};
use crate::normalize::normalize;
use crate::session::{LOGIN_PAGE_MARKER, SessionManager};

/// Calendar page, relative to the base URL.
const CALENDAR_PATH: &str = "calendar.php";

/// Default number of attempts per year.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff unit; attempt `n` waits `n` units first.
const DEFAULT_RETRY_UNIT: Duration = Duration::from_secs(2);

/// Classification of a calendar page response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// The page can be extracted.
    Success,
    /// The portal no longer accepts the session.
    SessionExpired,
    /// A gateway error worth retrying.
    Transient,
    /// Any other failure; retrying will not help.
    Fatal,
}

/// Classifies a calendar response.
///
/// `body` is only consulted for 2xx responses, where the login page marker
/// means the session was dropped without a redirect.
#[must_use]
pub fn classify_response(status: StatusCode, final_url: &Url, body: Option<&str>) -> ResponseClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        || final_url.as_str().contains("login")
    {
        return ResponseClass::SessionExpired;
    }
    if status.is_success() {
        return if body.is_some_and(|b| b.contains(LOGIN_PAGE_MARKER)) {
            ResponseClass::SessionExpired
        } else {
            ResponseClass::Success
        };
    }
    if (520..=523).contains(&status.as_u16()) {
        return ResponseClass::Transient;
    }
    ResponseClass::Fatal
}

/// Result of one request attempt.
enum Attempt {
    Page(String),
    Expired,
    Transient(String),
    Fatal(StatusCode),
}

/// Last retryable failure seen for a year.
enum LastFailure {
    Expired(Option<AuthError>),
    Transient(String),
}

/// Outcome of refreshing a set of years.
#[derive(Debug)]
pub struct PassReport {
    /// Years stored, with their booking counts, in fetch order.
    pub refreshed: Vec<(String, usize)>,
    /// Years that failed; their cache entries were left untouched.
    pub failed: Vec<(String, FetchError)>,
    /// When the pass finished.
    pub completed_at: DateTime<Utc>,
}

impl PassReport {
    /// Returns `true` when every year was refreshed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fetches calendar pages and stores the normalized bookings.
pub struct CalendarFetcher<E = LiteralRewriteExtractor> {
    sessions: Arc<SessionManager>,
    cache: Arc<BookingCache>,
    extractor: E,
    property: String,
    max_attempts: u32,
    retry_unit: Duration,
}

impl<E: fmt::Debug> fmt::Debug for CalendarFetcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendarFetcher")
            .field("property", &self.property)
            .field("extractor", &self.extractor)
            .field("max_attempts", &self.max_attempts)
            .field("retry_unit", &self.retry_unit)
            .finish_non_exhaustive()
    }
}

impl CalendarFetcher {
    /// Creates a fetcher for `property` using the default extractor.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionManager>,
        cache: Arc<BookingCache>,
        property: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            cache,
            extractor: LiteralRewriteExtractor::new(),
            property: property.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_unit: DEFAULT_RETRY_UNIT,
        }
    }
}

impl<E: EventExtractor> CalendarFetcher<E> {
    /// Replaces the event extractor.
    #[must_use]
    pub fn with_extractor<F: EventExtractor>(self, extractor: F) -> CalendarFetcher<F> {
        CalendarFetcher {
            sessions: self.sessions,
            cache: self.cache,
            extractor,
            property: self.property,
            max_attempts: self.max_attempts,
            retry_unit: self.retry_unit,
        }
    }

    /// Sets the attempt budget per year (default: 3, minimum: 1).
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the backoff unit (default: 2s).
    #[must_use]
    pub fn retry_unit(mut self, unit: Duration) -> Self {
        self.retry_unit = unit;
        self
    }

    /// Makes one request for `year` with the live session.
    async fn attempt(&self, year: &str) -> Attempt {
        let url = match self.sessions.base_url().join(CALENDAR_PATH) {
            Ok(url) => url,
            Err(e) => return Attempt::Transient(format!("invalid calendar URL: {e}")),
        };
        let session = self.sessions.current();
        let send_result = session
            .client()
            .get(url)
            .query(&[("property", self.property.as_str()), ("year", year)])
            .send()
            .await;
        let response = match send_result {
            Ok(r) => r,
            Err(e) => return Attempt::Transient(format!("request failed: {e}")),
        };

        let status = response.status();
        let final_url = response.url().clone();
        tracing::debug!(%status, url = %final_url, "Calendar response received");

        if !status.is_success() {
            return match classify_response(status, &final_url, None) {
                ResponseClass::SessionExpired => Attempt::Expired,
                ResponseClass::Transient => Attempt::Transient(format!("gateway status {status}")),
                ResponseClass::Success | ResponseClass::Fatal => Attempt::Fatal(status),
            };
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Attempt::Transient(format!("failed to read response body: {e}")),
        };
        tracing::debug!(body_len = body.len(), "Calendar body received");

        match classify_response(status, &final_url, Some(&body)) {
            ResponseClass::SessionExpired => Attempt::Expired,
            _ => Attempt::Page(body),
        }
    }

    /// Refreshes the cache entry for one year.
    ///
    /// Makes up to `max_attempts` requests. Expired sessions are restored
    /// before the next attempt; gateway and network failures back off
    /// linearly. The cache entry is only replaced on success.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] when attempts run out, on a non-retryable
    /// status, or when the page cannot be extracted.
    #[instrument(skip(self), fields(property = %self.property))]
    pub async fn fetch_year(&self, year: &str) -> Result<usize, FetchError> {
        let mut needs_login = false;
        let mut last_failure = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let wait = self.retry_unit.saturating_mul(attempt);
                tracing::info!(attempt, wait_secs = wait.as_secs_f64(), "Retrying calendar fetch");
                tokio::time::sleep(wait).await;
            }

            if needs_login {
                tracing::warn!(attempt, "Session expired, re-authenticating");
                if let Err(e) = self.sessions.reauthenticate().await {
                    tracing::warn!(attempt, error = %e, "Re-authentication failed");
                    last_failure = Some(LastFailure::Expired(Some(e)));
                    continue;
                }
                needs_login = false;
            }

            match self.attempt(year).await {
                Attempt::Page(body) => {
                    let events = self.extractor.extract(&body)?;
                    let bookings = normalize(&events);
                    let count = self.cache.replace_year(year, bookings);
                    tracing::info!(count, "Stored bookings");
                    return Ok(count);
                }
                Attempt::Expired => {
                    tracing::warn!(attempt, "Portal session expired");
                    needs_login = true;
                    last_failure = Some(LastFailure::Expired(None));
                }
                Attempt::Transient(reason) => {
                    tracing::warn!(attempt, %reason, "Transient portal failure");
                    last_failure = Some(LastFailure::Transient(reason));
                }
                Attempt::Fatal(status) => {
                    return Err(FetchError::Fatal {
                        status: status.as_u16(),
                    });
                }
            }
        }

        let attempts = self.max_attempts;
        Err(match last_failure {
            Some(LastFailure::Expired(reauth)) => FetchError::SessionExpired { attempts, reauth },
            Some(LastFailure::Transient(reason)) => FetchError::Transient { attempts, reason },
            None => FetchError::Transient {
                attempts,
                reason: String::from("no attempt made"),
            },
        })
    }

    /// Refreshes `years` in order with the shared session, then stamps the
    /// cache's last-fetch time.
    ///
    /// A failing year is logged and does not stop the pass.
    pub async fn fetch_all(&self, years: &[String]) -> PassReport {
        let mut refreshed = Vec::with_capacity(years.len());
        let mut failed = Vec::new();

        for year in years {
            match self.fetch_year(year).await {
                Ok(count) => refreshed.push((year.clone(), count)),
                Err(e) => {
                    tracing::error!(%year, error = %e, "Failed to refresh year");
                    failed.push((year.clone(), e));
                }
            }
        }

        let completed_at = Utc::now();
        self.cache.mark_pass_complete(completed_at);
        tracing::info!(
            refreshed = refreshed.len(),
            failed = failed.len(),
            "Fetch pass complete"
        );

        PassReport {
            refreshed,
            failed,
            completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use chrono::NaiveDate;
    use ownercal_cache::{Booking, Category};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ExtractError;
    use crate::session::Credentials;
    use crate::session::tests::{
        SESSION_COOKIE, base_url, connect, mount_home, mount_login_success,
    };

    const PAGE: &str = include_str!("../../../fixtures/portal/calendar_2025.html");
    const LOGIN_PAGE: &str = include_str!("../../../fixtures/portal/login_page.html");

    async fn make_fetcher(server: &MockServer) -> (CalendarFetcher, Arc<BookingCache>) {
        let sessions = Arc::new(connect(server).await);
        let cache = Arc::new(BookingCache::new());
        let fetcher = CalendarFetcher::new(sessions, Arc::clone(&cache), "GRA1901")
            .retry_unit(Duration::ZERO);
        (fetcher, cache)
    }

    fn stale_booking() -> Booking {
        Booking {
            start_date: String::from("2025-12-01"),
            end_date: NaiveDate::from_ymd_opt(2025, 12, 3).unwrap(),
            category: Category::Booked,
            available: false,
        }
    }

    fn calendar() -> wiremock::MockBuilder {
        Mock::given(method("GET")).and(path("/calendar.php"))
    }

    #[test]
    fn test_classify_response() {
        let url = Url::parse("https://portal.example/calendar.php").unwrap();
        let login_url = Url::parse("https://portal.example/login.php").unwrap();

        assert_eq!(
            classify_response(StatusCode::OK, &url, Some("<html></html>")),
            ResponseClass::Success
        );
        assert_eq!(
            classify_response(StatusCode::NO_CONTENT, &url, Some("")),
            ResponseClass::Success
        );
        assert_eq!(
            classify_response(StatusCode::OK, &url, Some(LOGIN_PAGE)),
            ResponseClass::SessionExpired
        );
        assert_eq!(
            classify_response(StatusCode::OK, &login_url, Some("")),
            ResponseClass::SessionExpired
        );
        assert_eq!(
            classify_response(StatusCode::UNAUTHORIZED, &url, None),
            ResponseClass::SessionExpired
        );
        assert_eq!(
            classify_response(StatusCode::FORBIDDEN, &url, None),
            ResponseClass::SessionExpired
        );
        for code in 520..=523 {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                classify_response(status, &url, None),
                ResponseClass::Transient
            );
        }
        assert_eq!(
            classify_response(StatusCode::NOT_FOUND, &url, None),
            ResponseClass::Fatal
        );
        assert_eq!(
            classify_response(StatusCode::INTERNAL_SERVER_ERROR, &url, None),
            ResponseClass::Fatal
        );
    }

    #[tokio::test]
    async fn test_fetch_year_stores_bookings() {
        // Arrange
        let mock_server = MockServer::start().await;
        mount_login_success(&mock_server).await;
        calendar()
            .and(query_param("property", "GRA1901"))
            .and(query_param("year", "2025"))
            .and(header("cookie", SESSION_COOKIE))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&mock_server)
            .await;
        let (fetcher, cache) = make_fetcher(&mock_server).await;

        // Act
        let count = fetcher.fetch_year("2025").await.unwrap();

        // Assert
        assert_eq!(count, 4);
        let bookings = cache.bookings("2025");
        assert_eq!(bookings.len(), 4);
        assert_eq!(bookings[0].start_date, "2025-01-03");
        assert_eq!(
            bookings[0].end_date,
            NaiveDate::from_ymd_opt(2025, 1, 9).unwrap()
        );
        assert_eq!(bookings[0].category, Category::GuestReservation);
        assert_eq!(bookings[1].category, Category::OwnerReservation);
        assert_eq!(bookings[2].category, Category::OtaBooking);
        assert_eq!(bookings[3].category, Category::Booked);
    }

    #[tokio::test]
    async fn test_fetch_year_recovers_from_transient_failures() {
        // Arrange
        let mock_server = MockServer::start().await;
        mount_login_success(&mock_server).await;
        calendar()
            .respond_with(ResponseTemplate::new(522))
            .up_to_n_times(2)
            .expect(2)
            .mount(&mock_server)
            .await;
        calendar()
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&mock_server)
            .await;
        let (fetcher, cache) = make_fetcher(&mock_server).await;

        // Act
        let count = fetcher.fetch_year("2025").await.unwrap();

        // Assert
        assert_eq!(count, 4);
        assert_eq!(cache.bookings("2025").len(), 4);
    }

    #[tokio::test]
    async fn test_fetch_year_gives_up_and_keeps_cache() {
        // Arrange
        let mock_server = MockServer::start().await;
        mount_login_success(&mock_server).await;
        calendar()
            .respond_with(ResponseTemplate::new(521))
            .expect(3)
            .mount(&mock_server)
            .await;
        let (fetcher, cache) = make_fetcher(&mock_server).await;
        cache.replace_year("2025", vec![stale_booking()]);

        // Act
        let result = fetcher.fetch_year("2025").await;

        // Assert
        assert!(matches!(
            result,
            Err(FetchError::Transient { attempts: 3, .. })
        ));
        assert_eq!(cache.bookings("2025"), vec![stale_booking()]);
    }

    #[tokio::test]
    async fn test_fetch_year_timeout_is_transient() {
        // Arrange
        let mock_server = MockServer::start().await;
        mount_login_success(&mock_server).await;
        calendar()
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(PAGE)
                    .set_delay(Duration::from_secs(2)),
            )
            .expect(3)
            .mount(&mock_server)
            .await;
        let sessions = SessionManager::builder(Credentials::new("owner@example.com", "hunter2"))
            .base_url(base_url(&mock_server))
            .timeout(Duration::from_millis(300))
            .connect()
            .await
            .unwrap();
        let cache = Arc::new(BookingCache::new());
        let fetcher = CalendarFetcher::new(Arc::new(sessions), Arc::clone(&cache), "GRA1901")
            .retry_unit(Duration::ZERO);

        // Act
        let result = fetcher.fetch_year("2025").await;

        // Assert
        assert!(matches!(
            result,
            Err(FetchError::Transient { attempts: 3, .. })
        ));
        assert!(cache.bookings("2025").is_empty());
    }

    #[tokio::test]
    async fn test_fetch_year_connection_refused_is_transient() {
        // Arrange
        let closed_port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mock_server = MockServer::start().await;
        mount_login_success(&mock_server).await;
        calendar()
            .respond_with(ResponseTemplate::new(302).insert_header(
                "Location",
                format!("http://127.0.0.1:{closed_port}/calendar.php").as_str(),
            ))
            .expect(3)
            .mount(&mock_server)
            .await;
        let (fetcher, cache) = make_fetcher(&mock_server).await;

        // Act
        let result = fetcher.fetch_year("2025").await;

        // Assert
        let Err(FetchError::Transient { attempts, reason }) = result else {
            panic!("expected Transient, got {result:?}");
        };
        assert_eq!(attempts, 3);
        assert!(reason.starts_with("request failed"));
        assert!(cache.bookings("2025").is_empty());
    }

    #[tokio::test]
    async fn test_fetch_year_fatal_status_is_not_retried() {
        // Arrange
        let mock_server = MockServer::start().await;
        mount_login_success(&mock_server).await;
        calendar()
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;
        let (fetcher, _cache) = make_fetcher(&mock_server).await;

        // Act
        let result = fetcher.fetch_year("2025").await;

        // Assert
        assert!(matches!(result, Err(FetchError::Fatal { status: 404 })));
    }

    #[tokio::test]
    async fn test_fetch_year_relogs_in_when_login_page_served() {
        // Arrange
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/index.php"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", "/home.php")
                    .insert_header("Set-Cookie", "PHPSESSID=abc123; Path=/"),
            )
            .expect(2)
            .mount(&mock_server)
            .await;
        mount_home(&mock_server).await;
        calendar()
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        calendar()
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&mock_server)
            .await;
        let (fetcher, cache) = make_fetcher(&mock_server).await;

        // Act
        let count = fetcher.fetch_year("2025").await.unwrap();

        // Assert
        assert_eq!(count, 4);
        assert_eq!(cache.bookings("2025").len(), 4);
    }

    #[tokio::test]
    async fn test_fetch_year_login_redirect_is_expiry() {
        // Arrange
        let mock_server = MockServer::start().await;
        mount_login_success(&mock_server).await;
        calendar()
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/login.php"))
            .expect(3)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/login.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Please sign in"))
            .mount(&mock_server)
            .await;
        let (fetcher, _cache) = make_fetcher(&mock_server).await;

        // Act
        let result = fetcher.fetch_year("2025").await;

        // Assert
        assert!(matches!(
            result,
            Err(FetchError::SessionExpired {
                attempts: 3,
                reauth: None
            })
        ));
    }

    #[tokio::test]
    async fn test_fetch_year_reports_failed_reauthentication() {
        // Arrange
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/index.php"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", "/home.php")
                    .insert_header("Set-Cookie", "PHPSESSID=abc123; Path=/"),
            )
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/index.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
            .mount(&mock_server)
            .await;
        mount_home(&mock_server).await;
        calendar()
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&mock_server)
            .await;
        let (fetcher, _cache) = make_fetcher(&mock_server).await;

        // Act
        let result = fetcher.fetch_year("2025").await;

        // Assert: attempts 2 and 3 are spent on failed logins
        assert!(matches!(
            result,
            Err(FetchError::SessionExpired {
                attempts: 3,
                reauth: Some(AuthError::StillOnLoginPage)
            })
        ));
    }

    #[tokio::test]
    async fn test_fetch_year_extract_error_is_not_retried() {
        // Arrange
        let mock_server = MockServer::start().await;
        mount_login_success(&mock_server).await;
        calendar()
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .expect(1)
            .mount(&mock_server)
            .await;
        let (fetcher, cache) = make_fetcher(&mock_server).await;
        cache.replace_year("2025", vec![stale_booking()]);

        // Act
        let result = fetcher.fetch_year("2025").await;

        // Assert
        assert!(matches!(
            result,
            Err(FetchError::Extract(ExtractError::NotFound))
        ));
        assert_eq!(cache.bookings("2025").len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_failing_year() {
        // Arrange
        let mock_server = MockServer::start().await;
        mount_login_success(&mock_server).await;
        calendar()
            .and(query_param("year", "2025"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;
        calendar()
            .and(query_param("year", "2026"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&mock_server)
            .await;
        let (fetcher, cache) = make_fetcher(&mock_server).await;
        cache.replace_year("2025", vec![stale_booking()]);
        let years = vec![String::from("2025"), String::from("2026")];

        // Act
        let report = fetcher.fetch_all(&years).await;

        // Assert
        assert!(!report.is_complete());
        assert_eq!(report.refreshed, vec![(String::from("2026"), 4)]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "2025");
        assert_eq!(cache.bookings("2025"), vec![stale_booking()]);
        assert_eq!(cache.bookings("2026").len(), 4);
        assert_eq!(cache.last_fetch(), Some(report.completed_at));
    }

    #[tokio::test]
    async fn test_fetch_all_stamps_last_fetch_even_when_all_fail() {
        // Arrange
        let mock_server = MockServer::start().await;
        mount_login_success(&mock_server).await;
        calendar()
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        let (fetcher, cache) = make_fetcher(&mock_server).await;

        // Act
        let report = fetcher.fetch_all(&[String::from("2025")]).await;

        // Assert
        assert!(report.refreshed.is_empty());
        assert!(cache.last_fetch().is_some());
        assert!(cache.bookings("2025").is_empty());
    }
}
