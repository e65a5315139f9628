//! Pulls the `defaultEvents` JavaScript literal out of a calendar page.
//!
//! The literal is JavaScript, not JSON: single-quoted strings, bare keys and
//! trailing commas are rewritten before parsing. The rewrite is best effort
//! and a quote character inside a string value can still break it; such
//! pages surface as [`ExtractError::Malformed`].

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ExtractError;
use crate::event::RawEvent;

/// Regex locating the events array assigned to `defaultEvents`.
#[allow(clippy::expect_used)]
static EVENTS_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)var\s+defaultEvents\s*=\s*(\[.*?\]);")
        .expect("failed to compile events literal regex")
});

/// Regex for single-quoted string literals.
#[allow(clippy::expect_used)]
static SINGLE_QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([^']*)'").expect("failed to compile quote regex"));

/// Regex for unquoted object keys.
#[allow(clippy::expect_used)]
static BARE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([{,]\s*)(\w+):").expect("failed to compile key regex"));

/// Regex for a comma directly before a closing brace or bracket.
#[allow(clippy::expect_used)]
static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("failed to compile comma regex"));

/// Turns a calendar page into raw events.
///
/// Kept behind a trait so a structured parser can replace the rewrite.
pub trait EventExtractor {
    /// Extracts the event list from `page`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::NotFound`] when the page has no events literal,
    /// or [`ExtractError::Malformed`] when it does not parse.
    fn extract(&self, page: &str) -> Result<Vec<RawEvent>, ExtractError>;
}

/// Regex-rewrite extractor for the `var defaultEvents = [...];` literal.
#[derive(Debug, Clone, Default)]
pub struct LiteralRewriteExtractor {
    /// Where to write the rewritten literal when parsing fails.
    debug_dump: Option<PathBuf>,
}

impl LiteralRewriteExtractor {
    /// Creates an extractor that writes no debug artifact.
    #[must_use]
    pub const fn new() -> Self {
        Self { debug_dump: None }
    }

    /// Writes the rewritten text to `path` whenever parsing fails.
    #[must_use]
    pub fn with_debug_dump(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_dump = Some(path.into());
        self
    }

    fn dump(&self, rewritten: &str) {
        let Some(path) = self.debug_dump.as_ref() else {
            return;
        };
        match std::fs::write(path, rewritten) {
            Ok(()) => tracing::warn!(
                path = %path.display(),
                "Wrote unparseable events literal for inspection"
            ),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to write events debug dump"
            ),
        }
    }
}

impl EventExtractor for LiteralRewriteExtractor {
    fn extract(&self, page: &str) -> Result<Vec<RawEvent>, ExtractError> {
        let literal = find_events_literal(page).ok_or(ExtractError::NotFound)?;
        let rewritten = rewrite_js_literal(literal);
        tracing::trace!(
            preview = &rewritten[..rewritten.floor_char_boundary(500)],
            "Rewritten events literal"
        );

        match serde_json::from_str::<Vec<RawEvent>>(&rewritten) {
            Ok(events) => {
                tracing::debug!(count = events.len(), "Extracted events");
                Ok(events)
            }
            Err(source) => {
                self.dump(&rewritten);
                Err(ExtractError::Malformed { rewritten, source })
            }
        }
    }
}

/// Returns the array text assigned to `defaultEvents`, brackets included.
#[must_use]
pub fn find_events_literal(page: &str) -> Option<&str> {
    EVENTS_LITERAL_RE
        .captures(page)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Rewrites a JavaScript array literal into JSON.
///
/// Applied in order: single quotes become double quotes, bare keys are
/// quoted, trailing commas are dropped.
#[must_use]
pub fn rewrite_js_literal(literal: &str) -> String {
    let quoted = SINGLE_QUOTED_RE.replace_all(literal, "\"${1}\"");
    let keyed = BARE_KEY_RE.replace_all(&quoted, "${1}\"${2}\":");
    TRAILING_COMMA_RE.replace_all(&keyed, "${1}").into_owned()
}
