//! Read API over the booking cache.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderMap, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use ownercal_cache::{Booking, BookingCache};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::scheduler::Clock;

/// Shared state for the read handlers.
#[derive(Clone)]
pub struct AppState {
    cache: Arc<BookingCache>,
    years: Arc<[String]>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates handler state over `cache`, advertising `years`.
    pub fn new(cache: Arc<BookingCache>, years: Vec<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            years: years.into(),
            clock,
        }
    }
}

/// `GET /api/bookings` query.
#[derive(Debug, Deserialize)]
struct BookingsQuery {
    year: Option<String>,
}

/// `GET /api/bookings` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingsResponse {
    bookings: Vec<Booking>,
    year: String,
    last_fetch: String,
}

/// `GET /api/years` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct YearsResponse {
    years: Vec<String>,
    current_year: i32,
}

/// `GET /api/health` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    last_fetch: String,
}

/// GET /api/bookings?year=YYYY - cached bookings for one year
async fn bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingsQuery>,
) -> Json<BookingsResponse> {
    let year = query
        .year
        .filter(|y| !y.is_empty())
        .unwrap_or_else(|| state.clock.current_year().to_string());

    Json(BookingsResponse {
        bookings: state.cache.bookings_sorted(&year),
        last_fetch: state.cache.last_fetch_rfc3339(),
        year,
    })
}

/// GET /api/years - configured years
async fn years(State(state): State<AppState>) -> Json<YearsResponse> {
    Json(YearsResponse {
        years: state.years.to_vec(),
        current_year: state.clock.current_year(),
    })
}

/// GET /api/health - liveness and freshness
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        last_fetch: state.cache.last_fetch_rfc3339(),
    })
}

/// Resolves the client address: `X-Forwarded-For` (first hop), then
/// `X-Real-IP`, then the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|v| String::from(v.trim()))
        .or_else(|| header("x-real-ip").map(String::from))
        .or_else(|| peer.map(|p| p.ip().to_string()))
}

/// Logs visits to the calendar page.
async fn log_page_visit(request: Request, next: Next) -> Response {
    if request.uri().path() == "/" {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip = client_ip(request.headers(), peer);
        tracing::info!(
            client_ip = ip.as_deref().unwrap_or("unknown"),
            "Calendar page requested"
        );
    }
    next.run(request).await
}

/// Builds the application router.
///
/// `static_dir`, when set, is served for every path outside `/api`.
pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    let public = Router::new()
        .route("/api/bookings", get(bookings))
        .route("/api/years", get(years))
        .layer(cors);

    let mut app = Router::new()
        .merge(public)
        .route("/api/health", get(health));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(middleware::from_fn(log_page_visit))
        .with_state(state)
}

/// Serves `app` on `port` until `shutdown` flips or its sender is dropped.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(app: Router, port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    })
    .await
    .context("HTTP server failed")
}
