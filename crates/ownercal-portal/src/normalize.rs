//! Converts raw portal events into [`Booking`] records.

use chrono::{Days, NaiveDate};
use ownercal_cache::{Booking, Category};

use crate::event::RawEvent;

/// Portal background colours and the categories they stand for.
const COLOR_CATEGORIES: [(&str, Category); 7] = [
    ("#1976d2", Category::GuestReservation),
    ("#8bc34a", Category::GolfReservation),
    ("#008080", Category::OtaBooking),
    ("#ff6633", Category::OwnerReservation),
    ("#8047d1", Category::OwnerReferral),
    ("#ff1493", Category::Complimentary),
    ("#ffc107", Category::GuestReservationAwaitingPayment),
];

/// Maps a portal background colour to a booking category.
///
/// Matching is case-insensitive. An empty colour is [`Category::Booked`];
/// an unrecognised one falls back to [`Category::OwnerReservation`].
#[must_use]
pub fn category_for_color(color: &str) -> Category {
    if color.is_empty() {
        return Category::Booked;
    }
    COLOR_CATEGORIES
        .iter()
        .find(|(hex, _)| hex.eq_ignore_ascii_case(color))
        .map_or_else(
            || {
                tracing::warn!(%color, "Unknown event colour, assuming owner reservation");
                Category::OwnerReservation
            },
            |&(_, category)| category,
        )
}

/// Converts the portal's exclusive `end` into an inclusive last day.
///
/// Unparseable input yields [`Booking::unknown_date`].
fn inclusive_end(end: &str) -> NaiveDate {
    NaiveDate::parse_from_str(end, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.checked_sub_days(Days::new(1)))
        .unwrap_or_else(|| {
            tracing::debug!(%end, "Unparseable end date");
            Booking::unknown_date()
        })
}

/// Converts raw events into bookings, one per event, in input order.
#[must_use]
pub fn normalize(events: &[RawEvent]) -> Vec<Booking> {
    events
        .iter()
        .map(|event| Booking {
            start_date: event.start.clone(),
            end_date: inclusive_end(&event.end),
            category: category_for_color(event.background_color.as_deref().unwrap_or_default()),
            available: false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use tracing::Level;
    use tracing_mock::{expect, subscriber};

    use super::*;
    use crate::extract::{EventExtractor, LiteralRewriteExtractor};

    fn make_event(start: &str, end: &str, color: Option<&str>) -> RawEvent {
        RawEvent {
            title: None,
            arrival: None,
            departure: None,
            booked: None,
            name: None,
            rent: None,
            start: String::from(start),
            end: String::from(end),
            background_color: color.map(String::from),
        }
    }

    #[test]
    fn test_all_known_colors() {
        let cases = [
            ("#1976d2", "Guest Reservation"),
            ("#8bc34a", "Golf Reservation"),
            ("#008080", "OTA Booking"),
            ("#ff6633", "Owner Reservation"),
            ("#8047d1", "Owner Referral"),
            ("#ff1493", "Complimentary"),
            ("#ffc107", "Guest Reservation Awaiting Payment"),
        ];
        for (color, label) in cases {
            assert_eq!(category_for_color(color).label(), label, "color {color}");
        }
    }

    #[test]
    fn test_color_match_is_case_insensitive() {
        assert_eq!(category_for_color("#FF1493"), Category::Complimentary);
        assert_eq!(category_for_color("#8BC34A"), Category::GolfReservation);
    }

    #[test]
    fn test_empty_color_is_booked() {
        assert_eq!(category_for_color(""), Category::Booked);
    }

    #[test]
    fn test_unknown_color_falls_back_with_warning() {
        // Arrange
        let (subscriber, handle) = subscriber::mock()
            .event(
                expect::event()
                    .at_level(Level::WARN)
                    .with_target("ownercal_portal::normalize"),
            )
            .only()
            .run_with_handle();

        // Act
        let category = tracing::subscriber::with_default(subscriber, || {
            category_for_color("#abcdef")
        });

        // Assert
        assert_eq!(category, Category::OwnerReservation);
        handle.assert_finished();
    }

    #[test]
    fn test_end_date_is_made_inclusive() {
        // Arrange
        let events = vec![make_event("2025-03-01", "2025-03-05", Some("#1976d2"))];

        // Act
        let bookings = normalize(&events);

        // Assert
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].start_date, "2025-03-01");
        assert_eq!(
            bookings[0].end_date,
            NaiveDate::from_ymd_opt(2025, 3, 4).unwrap()
        );
        assert_eq!(bookings[0].category, Category::GuestReservation);
        assert!(!bookings[0].available);
    }

    #[test]
    fn test_end_date_crosses_month_boundary() {
        // Arrange
        let events = vec![make_event("2024-02-25", "2024-03-01", None)];

        // Act
        let bookings = normalize(&events);

        // Assert
        assert_eq!(
            bookings[0].end_date,
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(bookings[0].category, Category::Booked);
    }

    #[test]
    fn test_malformed_end_date_uses_placeholder() {
        // Arrange
        let events = vec![
            make_event("2025-05-01", "05/08/2025", Some("#008080")),
            make_event("2025-06-01", "2025-06-03", Some("#008080")),
        ];

        // Act
        let bookings = normalize(&events);

        // Assert: processing continues past the bad row
        assert_eq!(bookings.len(), 2);
        assert_eq!(bookings[0].end_date, Booking::unknown_date());
        assert_eq!(bookings[0].start_date, "2025-05-01");
        assert_eq!(
            bookings[1].end_date,
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
        );
    }

    #[test]
    fn test_start_date_passed_through_verbatim() {
        let events = vec![make_event("2025-7-4", "2025-07-06", Some("#ff1493"))];
        let bookings = normalize(&events);
        assert_eq!(bookings[0].start_date, "2025-7-4");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        // Arrange
        let events = vec![
            make_event("2025-01-03", "2025-01-10", Some("#1976d2")),
            make_event("2025-02-14", "2025-02-17", Some("#FF6633")),
        ];

        // Act
        let first = normalize(&events);
        let second = normalize(&events);

        // Assert
        assert_eq!(first, second);
    }

    #[test]
    fn test_extract_then_normalize_is_deterministic() {
        // Arrange
        let page = include_str!("../../../fixtures/portal/calendar_2025.html");
        let extractor = LiteralRewriteExtractor::new();

        // Act
        let first = normalize(&extractor.extract(page).unwrap());
        let second = normalize(&extractor.extract(page).unwrap());

        // Assert
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize(&[]).is_empty());
    }
}
