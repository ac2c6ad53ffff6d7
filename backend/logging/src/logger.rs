//! Structured Logger
//!
//! Wraps `tracing` to provide text or JSON console output, optional file
//! rotation (NDJSON), and environment-based level control.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LEVEL: &str = "info";
pub const DEFAULT_FILE_NAME: &str = "botbus.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => bail!("unknown log format '{}'", other),
        }
    }
}

/// Logger configuration, usually read from a `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set, e.g. `info` or `botbus_core=debug`.
    pub level: String,
    pub format: LogFormat,
    /// Directory for the rolling log file. No file is written when unset.
    pub directory: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            format: LogFormat::Text,
            directory: None,
            file_name: DEFAULT_FILE_NAME.to_string(),
        }
    }
}

impl LoggingSettings {
    /// Build settings from string entries; missing keys keep their defaults.
    pub fn from_section(section: Option<&BTreeMap<String, String>>) -> Result<Self> {
        let mut settings = Self::default();
        let Some(section) = section else {
            return Ok(settings);
        };
        let value = |key: &str| section.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(level) = value("level") {
            settings.level = level.to_ascii_lowercase();
        }
        if let Some(format) = value("format") {
            settings.format = format.parse()?;
        }
        settings.directory = value("directory").map(PathBuf::from);
        if let Some(file_name) = value("file_name") {
            settings.file_name = file_name.to_string();
        }
        Ok(settings)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(normalize_level(&self.level)))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
    }
}

/// Map level names used in older configuration files onto tracing's.
fn normalize_level(level: &str) -> String {
    match level {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

/// Initialize the global structured logger.
///
/// Returns `false` if a global subscriber was already installed, and an error
/// if the log directory cannot be created.
pub fn init_logging(settings: &LoggingSettings) -> Result<bool> {
    let (text_layer, json_layer) = match settings.format {
        LogFormat::Text => (Some(fmt::layer().with_writer(std::io::stderr)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_writer(std::io::stderr))),
    };

    // Rolling file appender: writes NDJSON to `<directory>/<file_name>.YYYY-MM-DD`
    let file_layer = match &settings.directory {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&settings.file_name)
                .build(dir)
                .with_context(|| format!("cannot open log directory {}", dir.display()))?;
            Some(fmt::layer().json().with_writer(appender).with_ansi(false))
        }
        None => None,
    };

    Ok(tracing_subscriber::registry()
        .with(settings.filter())
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .is_ok())
}
