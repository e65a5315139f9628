//! `Booking` record and booking categories.

use std::fmt;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

/// Category of an occupied period, as shown to calendar readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Regular guest stay.
    GuestReservation,
    /// Golf package stay.
    GolfReservation,
    /// Booking through an online travel agency.
    OtaBooking,
    /// Owner's own stay.
    OwnerReservation,
    /// Stay referred by the owner.
    OwnerReferral,
    /// Complimentary stay.
    Complimentary,
    /// Guest stay with payment still outstanding.
    GuestReservationAwaitingPayment,
    /// Occupied, category unknown.
    Booked,
}

impl Category {
    /// Human-readable label used in the read API.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::GuestReservation => "Guest Reservation",
            Self::GolfReservation => "Golf Reservation",
            Self::OtaBooking => "OTA Booking",
            Self::OwnerReservation => "Owner Reservation",
            Self::OwnerReferral => "Owner Referral",
            Self::Complimentary => "Complimentary",
            Self::GuestReservationAwaitingPayment => "Guest Reservation Awaiting Payment",
            Self::Booked => "Booked",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Category {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.label())
    }
}

/// One occupied period on the public calendar.
///
/// Dates not covered by any booking are implicitly available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// First occupied day, verbatim from the portal.
    pub start_date: String,
    /// Last occupied day (inclusive). `0001-01-01` when the portal date was unreadable.
    pub end_date: NaiveDate,
    /// Booking category.
    pub category: Category,
    /// Always `false`; kept in the schema for calendar clients.
    pub available: bool,
}

impl Booking {
    /// Placeholder date (`0001-01-01`) for end dates that could not be parsed.
    #[must_use]
    pub fn unknown_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN)
    }
}
