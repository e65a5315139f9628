//! In-memory cache of normalized bookings.
//!
//! Holds one booking list per tracked year plus the completion time of the
//! most recent fetch pass. Many readers, one writer at a time; entries are
//! replaced wholesale and copied out to readers.

/// Public booking schema.
pub mod booking;
mod store;

pub use booking::{Booking, Category};
#[allow(clippy::module_name_repetitions)]
pub use store::BookingCache;
