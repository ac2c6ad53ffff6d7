//! Value references between config entries.
//!
//! `${key}` refers to a key of the same section, `${section:key}` to any
//! section. `$$` escapes to a literal `$`.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use botbus_core::ConfigSections;

use crate::error::ConfigError;

/// Deepest chain of references followed before giving up.
const MAX_DEPTH: usize = 10;

static REFERENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\$|\$\{(?:([^}:]+):)?([^}:]+)\}").unwrap());

/// Resolve every reference in `sections`.
pub fn interpolate(sections: &ConfigSections) -> Result<ConfigSections, ConfigError> {
    sections
        .iter()
        .map(|(name, entries)| {
            let resolved = entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), resolve(sections, name, key, value, 0)?)))
                .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;
            Ok((name.clone(), resolved))
        })
        .collect()
}

fn resolve(
    sections: &ConfigSections,
    section: &str,
    key: &str,
    value: &str,
    depth: usize,
) -> Result<String, ConfigError> {
    if !value.contains('$') {
        return Ok(value.to_string());
    }
    if depth >= MAX_DEPTH {
        return Err(ConfigError::invalid(section, key, "references nested too deeply"));
    }

    let mut failure = None;
    let resolved = REFERENCE_PATTERN.replace_all(value, |caps: &Captures| {
        let Some(target_key) = caps.get(2) else {
            return "$".to_string();
        };
        let target_section = caps.get(1).map_or(section, |m| m.as_str());
        let target_key = target_key.as_str();
        let target = sections
            .get(target_section)
            .and_then(|entries| entries.get(target_key));
        match target {
            Some(raw) => resolve(sections, target_section, target_key, raw, depth + 1)
                .unwrap_or_else(|e| {
                    failure.get_or_insert(e);
                    String::new()
                }),
            None => {
                failure.get_or_insert(ConfigError::invalid(
                    section,
                    key,
                    format!("unknown reference '{}'", &caps[0]),
                ));
                String::new()
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(resolved.into_owned()),
    }
}
