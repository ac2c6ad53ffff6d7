use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {origin}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for [{section}] {key}: {message}")]
    InvalidValue {
        section: String,
        key: String,
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(section: &str, key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }
}
