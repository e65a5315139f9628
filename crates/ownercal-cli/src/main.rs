//! ownercal - rental booking calendar scraped from the owner portal.

/// Application configuration (TOML + environment).
mod config;
/// Periodic refresh task.
mod scheduler;
/// HTTP read API.
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ownercal_cache::BookingCache;
use ownercal_portal::{
    CalendarFetcher, Credentials, LiteralRewriteExtractor, PassReport, SessionManager,
};
use tokio::sync::watch;
use tracing::instrument;
use tracing_subscriber::filter::EnvFilter;
#[cfg(not(feature = "otel"))]
use tracing_subscriber::fmt;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{AppConfig, config_path};
use crate::scheduler::{Clock, Scheduler, SystemClock};
use crate::server::AppState;

/// CLI argument parser.
#[derive(Parser)]
#[command(about, version)]
struct Cli {
    /// Override config directory.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Fetch all tracked years, then serve the read API and refresh periodically.
    Serve,
    /// Run one fetch pass and log the bookings as JSON.
    Fetch(FetchArgs),
    /// Show the effective configuration (password redacted).
    Config,
}

/// Arguments for the `fetch` subcommand.
#[derive(clap::Args)]
struct FetchArgs {
    /// Comma-separated years (e.g. "2024,2025"). Defaults to the tracked years.
    #[arg(long, value_delimiter = ',')]
    years: Option<Vec<String>>,
}

/// Loads the config file for `dir` with environment overrides applied.
fn load_config(dir: Option<&PathBuf>) -> Result<(PathBuf, AppConfig)> {
    let path = config_path(dir.map(PathBuf::as_path))?;
    let config = AppConfig::load_with_env(&path)?;
    Ok((path, config))
}

/// Logs in to the portal. Failure here is fatal.
///
/// # Errors
///
/// Returns an error if required settings are missing or the login fails.
#[instrument(skip_all)]
async fn connect(config: &AppConfig) -> Result<Arc<SessionManager>> {
    config.validate()?;
    let username = config
        .portal
        .username
        .clone()
        .context("PORTAL_USERNAME is required")?;
    let password = config
        .portal
        .password
        .clone()
        .context("PORTAL_PASSWORD is required")?;

    let sessions = SessionManager::builder(Credentials::new(username, password))
        .base_url(config.base_url()?)
        .timeout(config.timeout())
        .connect()
        .await
        .context("initial portal login failed")?;
    Ok(Arc::new(sessions))
}

/// Builds the fetcher from config.
///
/// # Errors
///
/// Returns an error if the property is not configured.
fn build_fetcher(
    config: &AppConfig,
    sessions: Arc<SessionManager>,
    cache: Arc<BookingCache>,
) -> Result<CalendarFetcher> {
    let property = config
        .portal
        .property
        .clone()
        .context("PORTAL_PROPERTY is required")?;

    let mut extractor = LiteralRewriteExtractor::new();
    if let Some(path) = config.debug_dump() {
        extractor = extractor.with_debug_dump(path);
    }

    Ok(CalendarFetcher::new(sessions, cache, property)
        .with_extractor(extractor)
        .max_attempts(config.portal.max_attempts)
        .retry_unit(config.retry_unit()))
}

/// Logs a one-line summary per failed year.
fn log_failures(report: &PassReport) {
    for (year, err) in &report.failed {
        tracing::warn!(%year, error = %err, "Year not refreshed");
    }
}

/// Resolves once Ctrl-C is received and flips `tx`.
async fn wait_for_shutdown(tx: watch::Sender<bool>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
    let _ = tx.send(true);
}

/// Runs the `serve` subcommand.
///
/// # Errors
///
/// Returns an error if config is invalid, the initial login fails, or the
/// server cannot start.
#[instrument(skip_all)]
async fn run_serve(dir: Option<&PathBuf>) -> Result<()> {
    let (_, config) = load_config(dir)?;
    let sessions = connect(&config).await?;
    let cache = Arc::new(BookingCache::new());
    let fetcher = Arc::new(build_fetcher(&config, sessions, Arc::clone(&cache))?);

    let clock = SystemClock;
    let years = config.tracked_years(clock.current_year());
    tracing::info!(?years, "Bootstrap fetch starting");
    let report = fetcher.fetch_all(&years).await;
    log_failures(&report);
    tracing::info!(
        refreshed = report.refreshed.len(),
        failed = report.failed.len(),
        "Bootstrap fetch finished"
    );

    let (tx, rx) = watch::channel(false);
    let scheduler = Scheduler::new(Arc::clone(&fetcher), clock, config.refresh_interval());
    let scheduler_task = tokio::spawn(scheduler.run(rx.clone()));
    tokio::spawn(wait_for_shutdown(tx));

    let state = AppState::new(cache, years, Arc::new(clock));
    let app = server::router(state, config.server.static_dir.clone());
    server::serve(app, config.server.port, rx).await?;

    scheduler_task.await.context("refresh scheduler task failed")?;
    tracing::info!("Shut down cleanly");
    Ok(())
}

/// Runs the `fetch` subcommand.
///
/// # Errors
///
/// Returns an error if the login fails or any year could not be refreshed.
#[instrument(skip_all)]
async fn run_fetch(args: &FetchArgs, dir: Option<&PathBuf>) -> Result<()> {
    let (_, config) = load_config(dir)?;
    let sessions = connect(&config).await?;
    let cache = Arc::new(BookingCache::new());
    let fetcher = build_fetcher(&config, sessions, Arc::clone(&cache))?;

    let years = args
        .years
        .clone()
        .unwrap_or_else(|| config.tracked_years(SystemClock.current_year()));
    let report = fetcher.fetch_all(&years).await;

    for year in cache.cached_years() {
        let bookings = cache.bookings_sorted(&year);
        let json =
            serde_json::to_string_pretty(&bookings).context("failed to serialize bookings")?;
        tracing::info!(%year, count = bookings.len(), "Bookings:\n{json}");
    }
    log_failures(&report);

    if !report.is_complete() {
        bail!(
            "{} of {} years could not be refreshed",
            report.failed.len(),
            years.len()
        );
    }
    Ok(())
}

/// Runs the `config` subcommand.
///
/// # Errors
///
/// Returns an error if the config file cannot be loaded or serialized.
fn run_config(dir: Option<&PathBuf>) -> Result<()> {
    let (path, config) = load_config(dir)?;
    let rendered =
        toml::to_string_pretty(&config.redacted()).context("failed to serialize config")?;
    tracing::info!(path = %path.display(), "Effective config:\n{rendered}");
    if let Err(e) = config.validate() {
        tracing::warn!(error = %e, "Config is incomplete");
    }
    Ok(())
}

/// Holds the OTLP tracer provider, if one was installed.
#[derive(Default)]
struct TracingGuard {
    #[cfg(feature = "otel")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl TracingGuard {
    /// Flushes pending spans and stops the exporter.
    #[cfg_attr(not(feature = "otel"), allow(clippy::unused_self))]
    fn shutdown(self) {
        #[cfg(feature = "otel")]
        if let Some(provider) = self.provider
            && let Err(e) = provider.shutdown()
        {
            tracing::warn!(error = %e, "Failed to shut down tracer provider");
        }
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` controls filtering (default `info`). With the `otel` feature,
/// spans are also exported over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() -> TracingGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    #[cfg_attr(not(feature = "otel"), allow(unused_mut))]
    let mut guard = TracingGuard::default();

    #[cfg(not(feature = "otel"))]
    {
        fmt().with_env_filter(env_filter).with_target(false).init();
    }

    #[cfg(feature = "otel")]
    {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

        let otel_layer = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .and_then(|_| {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .build()
                    .ok()?;

                let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                    .with_batch_exporter(exporter)
                    .build();

                let tracer = opentelemetry::trace::TracerProvider::tracer(
                    &tracer_provider,
                    env!("CARGO_PKG_NAME"),
                );
                guard.provider = Some(tracer_provider.clone());
                opentelemetry::global::set_tracer_provider(tracer_provider);

                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .init();
    }

    guard
}

/// Entry point.
///
/// # Errors
///
/// Returns an error if subcommand execution fails.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let tracing_guard = init_tracing();

    let result = match cli.command {
        Commands::Serve => run_serve(cli.dir.as_ref()).await,
        Commands::Fetch(args) => run_fetch(&args, cli.dir.as_ref()).await,
        Commands::Config => run_config(cli.dir.as_ref()),
    };
    tracing_guard.shutdown();
    result
}
