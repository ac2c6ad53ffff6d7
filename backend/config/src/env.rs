//! Plugin parameters taken from the process environment.

use botbus_core::Environment;

/// Collect environment variables starting with `prefix` (case-insensitive,
/// prefix stripped), then overlay explicit `[key, value...]` entries.
///
/// Entry values are joined with `,`; entries without a value are ignored.
pub fn get_environment(prefix: Option<&str>, entries: &[Vec<String>]) -> Environment {
    let vars = std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
    get_environment_from(vars, prefix, entries)
}

/// Same as [`get_environment`] over an explicit variable list.
pub fn get_environment_from<I>(vars: I, prefix: Option<&str>, entries: &[Vec<String>]) -> Environment
where
    I: IntoIterator<Item = (String, String)>,
{
    let prefix = prefix.unwrap_or_default().to_uppercase();
    let mut env: Environment = vars
        .into_iter()
        .filter_map(|(key, value)| {
            if !key.to_uppercase().starts_with(&prefix) {
                return None;
            }
            let stripped = key.get(prefix.len()..)?;
            Some((stripped.to_string(), value))
        })
        .collect();

    for entry in entries {
        if let [key, values @ ..] = entry.as_slice() {
            if !values.is_empty() {
                env.insert(key.clone(), values.join(","));
            }
        }
    }
    env
}
