//! Owner portal client for ownercal.
//!
//! Logs in to the property-management portal, fetches per-year calendar
//! pages, extracts the embedded event literal and normalizes it into
//! [`ownercal_cache::Booking`] records.

mod error;
mod event;
/// Calendar event literal extraction.
pub mod extract;
mod fetcher;
/// Raw event to booking conversion.
pub mod normalize;
mod refresh;
mod session;

pub use error::{AuthError, ExtractError, FetchError};
pub use event::RawEvent;
pub use extract::{EventExtractor, LiteralRewriteExtractor};
pub use fetcher::{CalendarFetcher, PassReport, ResponseClass, classify_response};
pub use normalize::{category_for_color, normalize};
pub use refresh::{BookingRefresher, LocalBookingRefresher};
pub use session::{
    Credentials, DEFAULT_BASE_URL, LOGIN_PAGE_MARKER, Session, SessionManager,
    SessionManagerBuilder, USER_AGENT,
};
