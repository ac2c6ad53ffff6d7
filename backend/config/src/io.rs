//! Config file reading and flattening into string sections.

use std::path::Path;

use botbus_core::ConfigSections;
use tokio::fs;
use toml::{Table, Value};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::interpolate::interpolate;

/// Configuration shipped with the binary.
pub const DEFAULT_CONFIG: &str = include_str!("../default.toml");

/// Load the configuration at `path`, or the packaged default when `None`.
pub async fn load_config(path: Option<&Path>) -> Result<ConfigSections, ConfigError> {
    let Some(path) = path else {
        debug!("Using packaged configuration");
        return parse_config(DEFAULT_CONFIG, "packaged configuration");
    };
    let raw = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let config = parse_config(&raw, &path.display().to_string())?;
    info!(path = %path.display(), sections = config.len(), "Loaded config");
    Ok(config)
}

/// Parse TOML text into sections of string values.
///
/// Nested tables become dotted section names: `[plugin.git]` is section
/// `plugin.git`. Values are stringified, arrays joined with `,`, then
/// `${key}` / `${section:key}` references are resolved.
pub fn parse_config(text: &str, origin: &str) -> Result<ConfigSections, ConfigError> {
    let table: Table = text.parse().map_err(|source| ConfigError::Parse {
        origin: origin.to_string(),
        source,
    })?;

    let mut sections = ConfigSections::new();
    for (name, value) in &table {
        match value {
            Value::Table(inner) => flatten(name, inner, &mut sections)?,
            _ => return Err(ConfigError::invalid("", name, "value outside of a section")),
        }
    }
    interpolate(&sections)
}

fn flatten(section: &str, table: &Table, out: &mut ConfigSections) -> Result<(), ConfigError> {
    // a table holding only subtables still yields an (empty) section of its own
    let entries = out.entry(section.to_string()).or_default();
    let mut nested = Vec::new();
    for (key, value) in table {
        match value {
            Value::Table(inner) => nested.push((format!("{}.{}", section, key), inner)),
            other => {
                entries.insert(key.clone(), stringify(section, key, other)?);
            }
        }
    }
    for (name, inner) in nested {
        flatten(&name, inner, out)?;
    }
    Ok(())
}

fn stringify(section: &str, key: &str, value: &Value) -> Result<String, ConfigError> {
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Datetime(d) => d.to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Array(_) | Value::Table(_) => {
                    Err(ConfigError::invalid(section, key, "nested arrays are not supported"))
                }
                scalar => stringify(section, key, scalar),
            })
            .collect::<Result<Vec<_>, _>>()?
            .join(","),
        Value::Table(_) => return Err(ConfigError::invalid(section, key, "unexpected table")),
    })
}
