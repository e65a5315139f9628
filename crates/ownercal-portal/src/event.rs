//! `RawEvent` - one entry of the calendar page's `defaultEvents` literal.

use serde::{Deserialize, Deserializer, de::Error as _};

/// Event as embedded in the portal's calendar page.
///
/// Only `start` and `end` are required. The free-text fields are carried for
/// diagnostics and may be strings, numbers or absent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawEvent {
    /// Display title.
    #[serde(default, deserialize_with = "deserialize_lenient_text")]
    pub title: Option<String>,
    /// Arrival text.
    #[serde(rename = "Arrival", default, deserialize_with = "deserialize_lenient_text")]
    pub arrival: Option<String>,
    /// Departure text.
    #[serde(rename = "Departure", default, deserialize_with = "deserialize_lenient_text")]
    pub departure: Option<String>,
    /// Booking date text.
    #[serde(rename = "Booked", default, deserialize_with = "deserialize_lenient_text")]
    pub booked: Option<String>,
    /// Guest name.
    #[serde(rename = "Name", default, deserialize_with = "deserialize_lenient_text")]
    pub name: Option<String>,
    /// Rent text.
    #[serde(rename = "Rent", default, deserialize_with = "deserialize_lenient_text")]
    pub rent: Option<String>,
    /// First occupied day (`YYYY-MM-DD`), empty when absent.
    #[serde(default, deserialize_with = "deserialize_text_or_empty")]
    pub start: String,
    /// Exclusive end day (`YYYY-MM-DD`), empty when absent.
    #[serde(default, deserialize_with = "deserialize_text_or_empty")]
    pub end: String,
    /// Hex colour encoding the booking category.
    #[serde(
        rename = "backgroundColor",
        default,
        deserialize_with = "deserialize_lenient_text"
    )]
    pub background_color: Option<String>,
}

/// Deserializes a string, number or boolean as text; `null` and `""` become `None`.
fn deserialize_lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s).filter(|s| !s.is_empty())),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_json::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!("expected text, found {other}"))),
    }
}

/// Like [`deserialize_lenient_text`] but yields `""` for absent text.
fn deserialize_text_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_lenient_text(deserializer).map(Option::unwrap_or_default)
}
