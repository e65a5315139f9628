//! Periodic refresh of the current and next year.

use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use ownercal_portal::BookingRefresher;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Source of the current calendar year.
pub trait Clock: Send + Sync {
    /// Current year in local time.
    fn current_year(&self) -> i32;
}

/// Wall clock in the host's local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current_year(&self) -> i32 {
        chrono::Local::now().year()
    }
}

/// Years refreshed on a tick at `year`: the year itself and the next.
#[must_use]
pub fn years_to_refresh(year: i32) -> Vec<String> {
    vec![year.to_string(), year.saturating_add(1).to_string()]
}

/// Shortest period a scheduler ticks at.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Runs a refresh pass every `interval` until shut down.
#[derive(Debug)]
pub struct Scheduler<R, C> {
    refresher: Arc<R>,
    clock: C,
    interval: Duration,
}

impl<R, C> Scheduler<R, C>
where
    R: BookingRefresher + Sync,
    C: Clock,
{
    /// Creates a scheduler. A zero `interval` is raised to one second.
    pub const fn new(refresher: Arc<R>, clock: C, interval: Duration) -> Self {
        Self {
            refresher,
            clock,
            interval: if interval.is_zero() {
                MIN_INTERVAL
            } else {
                interval
            },
        }
    }

    /// Ticks until `shutdown` flips or its sender is dropped.
    ///
    /// The first pass runs one interval after the call. A pass in progress
    /// is abandoned on shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately.
        ticker.tick().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Refresh scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let years = years_to_refresh(self.clock.current_year());
            tracing::info!(?years, "Scheduled refresh starting");
            tokio::select! {
                report = self.refresher.refresh(&years) => {
                    tracing::info!(
                        refreshed = report.refreshed.len(),
                        failed = report.failed.len(),
                        "Scheduled refresh finished"
                    );
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Refresh scheduler stopped");
    }
}
