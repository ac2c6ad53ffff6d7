use thiserror::Error;

/// Errors surfaced by the bus runtime.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("provider '{provider}' failed to register plugins: {source}")]
    Registration {
        provider: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("plugin '{plugin}' failed to handle event: {source}")]
    Handler {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to spawn worker thread for plugin '{plugin}': {source}")]
    Spawn {
        plugin: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_culprit() {
        let err = BotError::Handler {
            plugin: "git".into(),
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(err.to_string(), "plugin 'git' failed to handle event: boom");

        let err = BotError::Registration {
            provider: "heartbeat",
            source: anyhow::anyhow!("invalid interval"),
        };
        assert!(err.to_string().contains("heartbeat"));
        assert!(err.to_string().contains("invalid interval"));
    }
}
