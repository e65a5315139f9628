//! `BookingCache` - per-year booking store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::booking::Booking;

/// Rendering of `lastFetch` before any pass has completed.
const NEVER_FETCHED: &str = "0001-01-01T00:00:00Z";

#[derive(Debug, Default)]
struct CacheState {
    bookings: HashMap<String, Vec<Booking>>,
    last_fetch: Option<DateTime<Utc>>,
}

/// Year-keyed booking cache shared between the fetcher and read handlers.
///
/// The lock is only held to swap or clone a year's list, never across I/O.
#[derive(Debug, Default)]
pub struct BookingCache {
    state: RwLock<CacheState>,
}

impl BookingCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Entries are only ever swapped whole; a poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the booking list for `year`. Returns the number of bookings stored.
    pub fn replace_year(&self, year: &str, bookings: Vec<Booking>) -> usize {
        let count = bookings.len();
        let previous = self.write().bookings.insert(String::from(year), bookings);
        tracing::debug!(
            year,
            count,
            previous = previous.as_ref().map(Vec::len),
            "Cache entry replaced"
        );
        count
    }

    /// Returns a copy of the bookings for `year` (empty if never fetched).
    #[must_use]
    pub fn bookings(&self, year: &str) -> Vec<Booking> {
        self.read().bookings.get(year).cloned().unwrap_or_default()
    }

    /// Returns a copy of the bookings for `year`, ordered by start date.
    #[must_use]
    pub fn bookings_sorted(&self, year: &str) -> Vec<Booking> {
        let mut bookings = self.bookings(year);
        bookings.sort_by(|a, b| a.start_date.cmp(&b.start_date));
        bookings
    }

    /// Returns the years that currently hold an entry, sorted.
    #[must_use]
    pub fn cached_years(&self) -> Vec<String> {
        let mut years: Vec<String> = self.read().bookings.keys().cloned().collect();
        years.sort();
        years
    }

    /// Records the completion time of a fetch pass.
    pub fn mark_pass_complete(&self, at: DateTime<Utc>) {
        self.write().last_fetch = Some(at);
    }

    /// Completion time of the most recent pass, if any.
    #[must_use]
    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.read().last_fetch
    }

    /// `lastFetch` as RFC 3339 (UTC, second precision).
    #[must_use]
    pub fn last_fetch_rfc3339(&self) -> String {
        self.last_fetch().map_or_else(
            || String::from(NEVER_FETCHED),
            |t| t.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use chrono::{NaiveDate, TimeZone};

    use super::*;
    use crate::booking::Category;

    fn make_booking(start: &str, end: (i32, u32, u32)) -> Booking {
        Booking {
            start_date: String::from(start),
            end_date: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
            category: Category::GuestReservation,
            available: false,
        }
    }

    #[test]
    fn test_unknown_year_is_empty() {
        // Arrange
        let cache = BookingCache::new();

        // Act
        let bookings = cache.bookings("2025");

        // Assert
        assert!(bookings.is_empty());
    }

    #[test]
    fn test_replace_year_overwrites_whole_entry() {
        // Arrange
        let cache = BookingCache::new();
        cache.replace_year(
            "2025",
            vec![
                make_booking("2025-01-01", (2025, 1, 3)),
                make_booking("2025-02-01", (2025, 2, 3)),
            ],
        );

        // Act
        let stored = cache.replace_year("2025", vec![make_booking("2025-05-01", (2025, 5, 4))]);

        // Assert
        assert_eq!(stored, 1);
        let bookings = cache.bookings("2025");
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].start_date, "2025-05-01");
    }

    #[test]
    fn test_years_are_independent() {
        // Arrange
        let cache = BookingCache::new();
        cache.replace_year("2024", vec![make_booking("2024-07-01", (2024, 7, 5))]);

        // Act
        cache.replace_year("2025", vec![]);

        // Assert
        assert_eq!(cache.bookings("2024").len(), 1);
        assert!(cache.bookings("2025").is_empty());
        assert_eq!(cache.cached_years(), vec!["2024", "2025"]);
    }

    #[test]
    fn test_bookings_sorted_by_start_date() {
        // Arrange
        let cache = BookingCache::new();
        cache.replace_year(
            "2025",
            vec![
                make_booking("2025-08-10", (2025, 8, 12)),
                make_booking("2025-01-04", (2025, 1, 6)),
                make_booking("2025-03-15", (2025, 3, 20)),
            ],
        );

        // Act
        let sorted = cache.bookings_sorted("2025");

        // Assert
        let starts: Vec<&str> = sorted.iter().map(|b| b.start_date.as_str()).collect();
        assert_eq!(starts, vec!["2025-01-04", "2025-03-15", "2025-08-10"]);
    }

    #[test]
    fn test_last_fetch_never_fetched() {
        // Arrange
        let cache = BookingCache::new();

        // Act & Assert
        assert_eq!(cache.last_fetch(), None);
        assert_eq!(cache.last_fetch_rfc3339(), "0001-01-01T00:00:00Z");
    }

    #[test]
    fn test_mark_pass_complete() {
        // Arrange
        let cache = BookingCache::new();
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();

        // Act
        cache.mark_pass_complete(at);

        // Assert
        assert_eq!(cache.last_fetch(), Some(at));
        assert_eq!(cache.last_fetch_rfc3339(), "2025-06-01T12:30:00Z");
    }

    #[test]
    fn test_readers_see_complete_lists_during_writes() {
        // Arrange
        let cache = Arc::new(BookingCache::new());
        let small = vec![make_booking("2025-01-01", (2025, 1, 2))];
        let large: Vec<Booking> = (1..=50)
            .map(|d| make_booking(&format!("2025-01-{d:02}"), (2025, 2, 1)))
            .collect();
        cache.replace_year("2025", small.clone());

        // Act
        let writer = {
            let cache = Arc::clone(&cache);
            let (small, large) = (small.clone(), large.clone());
            std::thread::spawn(move || {
                for i in 0..200 {
                    let next = if i % 2 == 0 { large.clone() } else { small.clone() };
                    cache.replace_year("2025", next);
                }
            })
        };
        let mut observed = Vec::new();
        for _ in 0..200 {
            observed.push(cache.bookings("2025").len());
        }
        writer.join().unwrap();

        // Assert: every read sees one of the two complete lists
        assert!(observed.iter().all(|&n| n == 1 || n == 50));
    }
}
