//! `botbus-config`: configuration sections and plugin environment.
//!
//! Provides:
//! - TOML loading into string sections, with the packaged default
//! - `${key}` / `${section:key}` references between values
//! - environment extraction by prefix plus command-line entries
//! - typed accessors for the `[general]` section

pub mod env;
pub mod error;
pub mod interpolate;
pub mod io;

pub use env::{get_environment, get_environment_from};
pub use error::ConfigError;
pub use io::{load_config, parse_config, DEFAULT_CONFIG};

use botbus_core::{ConfigSections, HandlerPolicy};

pub const GENERAL_SECTION: &str = "general";
pub const LOGGING_SECTION: &str = "logging";

fn general<'a>(config: &'a ConfigSections, key: &str) -> Option<&'a str> {
    config
        .get(GENERAL_SECTION)
        .and_then(|s| s.get(key))
        .map(|v| v.as_str())
        .filter(|v| !v.is_empty())
}

/// `[general] environment_prefix`.
pub fn environment_prefix(config: &ConfigSections) -> Option<&str> {
    general(config, "environment_prefix")
}

pub fn identity(config: &ConfigSections) -> Option<&str> {
    general(config, "identity")
}

/// `[general] handler_policy`, defaulting to fail-fast.
pub fn handler_policy(config: &ConfigSections) -> Result<HandlerPolicy, ConfigError> {
    match general(config, "handler_policy") {
        Some(value) => value
            .parse::<HandlerPolicy>()
            .map_err(|e: anyhow::Error| ConfigError::invalid(GENERAL_SECTION, "handler_policy", e.to_string())),
        None => Ok(HandlerPolicy::default()),
    }
}
