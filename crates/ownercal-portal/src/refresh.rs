//! `BookingRefresher` trait definition.
#![allow(clippy::future_not_send)]

use crate::extract::EventExtractor;
use crate::fetcher::{CalendarFetcher, PassReport};

/// Refreshes cached bookings for a set of years.
///
/// Abstracts the fetch pass for mock substitution in scheduler tests.
/// Uses `trait_variant::make` to generate a `Send`-bound async trait.
#[trait_variant::make(BookingRefresher: Send)]
pub trait LocalBookingRefresher {
    /// Runs one fetch pass over `years`.
    async fn refresh(&self, years: &[String]) -> PassReport;
}

impl<E> BookingRefresher for CalendarFetcher<E>
where
    E: EventExtractor + Send + Sync,
{
    async fn refresh(&self, years: &[String]) -> PassReport {
        self.fetch_all(years).await
    }
}
