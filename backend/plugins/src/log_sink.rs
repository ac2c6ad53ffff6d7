//! Log sink. Writes every event it observes to the log at a fixed level.

use anyhow::bail;
use botbus_core::{ConfigSections, Environment, Event, Plugin, Plugins, SharedSink};
use tracing::{debug, error, info, trace, warn, Level};

pub const LOGGING_SECTION: &str = "plugin.logging";

pub struct LogSinkPlugin {
    name: String,
    level: Level,
}

impl LogSinkPlugin {
    pub fn new(name: impl Into<String>, level: Level) -> Self {
        Self {
            name: name.into(),
            level,
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl Plugin for LogSinkPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_event(&mut self, event: &Event) -> anyhow::Result<()> {
        let plugin = self.name.as_str();
        match self.level {
            Level::TRACE => trace!(plugin, ?event, "Event"),
            Level::DEBUG => debug!(plugin, ?event, "Event"),
            Level::INFO => info!(plugin, ?event, "Event"),
            Level::WARN => warn!(plugin, ?event, "Event"),
            _ => error!(plugin, ?event, "Event"),
        }
        Ok(())
    }
}

/// Parse a level name. Accepts tracing's names plus `WARNING`, `CRITICAL` and `FATAL`.
pub fn parse_level(level: &str) -> anyhow::Result<Level> {
    let normalized = level.trim().to_ascii_uppercase();
    let level = match normalized.as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" | "CRITICAL" | "FATAL" => Level::ERROR,
        _ => bail!("unknown log level '{}'", level),
    };
    Ok(level)
}

/// Registers a passive sink named after `general.identity` when `plugin.logging.level` is set.
pub fn register_plugins(
    workers: &mut Plugins,
    _sink: &SharedSink,
    config: &ConfigSections,
    _env: &Environment,
) -> anyhow::Result<()> {
    let Some(level) = config
        .get(LOGGING_SECTION)
        .and_then(|s| s.get("level"))
        .filter(|l| !l.is_empty())
    else {
        return Ok(());
    };
    let name = config
        .get("general")
        .and_then(|s| s.get("identity"))
        .cloned()
        .unwrap_or_default();
    workers.push(Box::new(LogSinkPlugin::new(name, parse_level(level)?)));
    Ok(())
}
