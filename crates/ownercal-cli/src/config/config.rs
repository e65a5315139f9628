//! `AppConfig` struct, TOML loading and environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use url::Url;

/// Config file name inside the config directory.
const CONFIG_FILE: &str = "config.toml";

/// Resolves the config file path.
///
/// - `dir` given: `{dir}/config.toml`.
/// - `XDG_CONFIG_HOME` set: `$XDG_CONFIG_HOME/ownercal/config.toml`.
/// - Otherwise: `~/.config/ownercal/config.toml`.
///
/// # Errors
///
/// Returns an error if neither `dir`, `XDG_CONFIG_HOME` nor `HOME` is available.
pub fn config_path(dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(d) = dir {
        return Ok(d.join(CONFIG_FILE));
    }
    let base = match std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        Some(xdg) => PathBuf::from(xdg),
        None => {
            let home = std::env::var_os("HOME").context("HOME environment variable is not set")?;
            PathBuf::from(home).join(".config")
        }
    };
    Ok(base.join("ownercal").join(CONFIG_FILE))
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AppConfig {
    /// Portal login and scraping settings.
    #[serde(default)]
    pub portal: PortalConfig,
    /// Read API settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Refresh schedule and tracked years.
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// Owner portal settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortalConfig {
    /// Login e-mail.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Property identifier passed to the calendar page.
    pub property: Option<String>,
    /// Portal base URL.
    pub base_url: String,
    /// Absolute timeout per request, in seconds.
    pub timeout_secs: u64,
    /// Attempts per year before giving up.
    pub max_attempts: u32,
    /// Backoff unit in seconds; attempt `n` waits `n` units.
    pub retry_unit_secs: u64,
    /// Where unparseable event literals are written. An empty path disables the dump.
    pub debug_dump: Option<PathBuf>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            property: None,
            base_url: String::from(ownercal_portal::DEFAULT_BASE_URL),
            timeout_secs: 30,
            max_attempts: 3,
            retry_unit_secs: 2,
            debug_dump: Some(PathBuf::from("events_debug.json")),
        }
    }
}

/// Read API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
    /// Directory served at `/`, if any.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            static_dir: None,
        }
    }
}

/// Refresh schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between scheduled passes.
    pub interval_secs: u64,
    /// Explicit years to fetch at startup. Empty means `first_year..=current+1`.
    pub years: Vec<String>,
    /// First year of the default range.
    pub first_year: i32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            years: Vec::new(),
            first_year: 2023,
        }
    }
}

impl AppConfig {
    /// Loads config from a TOML file. Returns default if file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Loads the config file and applies process environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or an override is invalid.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `PORTAL_*` and `PORT` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is not a valid port number.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = lookup("PORTAL_USERNAME") {
            self.portal.username = Some(v);
        }
        if let Some(v) = lookup("PORTAL_PASSWORD") {
            self.portal.password = Some(v);
        }
        if let Some(v) = lookup("PORTAL_PROPERTY") {
            self.portal.property = Some(v);
        }
        if let Some(v) = lookup("PORTAL_BASE_URL") {
            self.portal.base_url = v;
        }
        if let Some(v) = lookup("PORTAL_YEARS") {
            self.refresh.years = parse_years(&v);
        }
        if let Some(v) = lookup("PORT") {
            self.server.port = v
                .trim()
                .parse()
                .with_context(|| format!("invalid PORT value: {v:?}"))?;
        }
        Ok(())
    }

    /// Checks that everything needed to log in is present.
    ///
    /// # Errors
    ///
    /// Returns an error naming every missing setting, a zero timeout or
    /// refresh interval, or an invalid base URL.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("PORTAL_USERNAME", self.portal.username.as_deref()),
            ("PORTAL_PASSWORD", self.portal.password.as_deref()),
            ("PORTAL_PROPERTY", self.portal.property.as_deref()),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none_or(str::is_empty))
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            bail!("missing required settings: {}", missing.join(", "));
        }
        if self.portal.timeout_secs == 0 {
            bail!("portal.timeout_secs must be greater than zero");
        }
        if self.refresh.interval_secs == 0 {
            bail!("refresh.interval_secs must be greater than zero");
        }
        self.base_url()?;
        Ok(())
    }

    /// Parsed portal base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if `portal.base_url` is not a valid URL.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.portal.base_url)
            .with_context(|| format!("invalid portal base URL: {}", self.portal.base_url))
    }

    /// Years fetched at startup: the configured list, or `first_year..=current+1`.
    #[must_use]
    pub fn tracked_years(&self, current_year: i32) -> Vec<String> {
        if !self.refresh.years.is_empty() {
            return self.refresh.years.clone();
        }
        (self.refresh.first_year..=current_year.saturating_add(1))
            .map(|y| y.to_string())
            .collect()
    }

    /// Debug dump target, or `None` when unset or empty.
    #[must_use]
    pub fn debug_dump(&self) -> Option<&Path> {
        self.portal
            .debug_dump
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.portal.timeout_secs)
    }

    /// Backoff unit between attempts.
    #[must_use]
    pub const fn retry_unit(&self) -> Duration {
        Duration::from_secs(self.portal.retry_unit_secs)
    }

    /// Interval between scheduled passes.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_secs)
    }

    /// Copy safe to log: the password is replaced.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.portal.password.is_some() {
            copy.portal.password = Some(String::from("********"));
        }
        copy
    }
}

/// Splits a comma-separated year list, trimming entries and dropping empties.
fn parse_years(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|y| !y.is_empty())
        .map(String::from)
        .collect()
}
