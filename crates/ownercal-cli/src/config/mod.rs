//! Application configuration module.
//!
//! Loads the TOML config file and layers `PORTAL_*` / `PORT`
//! environment overrides on top.

#[allow(clippy::module_inception)]
mod config;

#[allow(clippy::module_name_repetitions)]
pub use config::{AppConfig, PortalConfig, RefreshConfig, ServerConfig, config_path};
