use std::path::Path;

use anyhow::{Context, Result};
use botbus_config::{load_config, LOGGING_SECTION};
use botbus_logging::LoggingSettings;

/// Logging settings from the `[logging]` section of the first source given:
/// the dedicated logging file, the main config file, or the packaged default.
pub async fn logging_settings(log_file: Option<&Path>, config_file: Option<&Path>) -> Result<LoggingSettings> {
    let source = log_file.or(config_file);
    let sections = load_config(source)
        .await
        .context("Failed to load logging configuration")?;
    LoggingSettings::from_section(sections.get(LOGGING_SECTION)).context("Invalid logging configuration")
}
