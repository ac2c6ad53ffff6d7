//! Registration protocol between the dispatcher and plugin providers.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::BotError;
use crate::plugin::{Plugin, SharedSink};

/// Configuration sections: section name -> key -> value.
pub type ConfigSections = BTreeMap<String, BTreeMap<String, String>>;

/// Environment entries handed to providers (secrets, tokens, ids).
pub type Environment = BTreeMap<String, String>;

pub type Plugins = Vec<Box<dyn Plugin>>;

/// Signature every provider satisfies: append zero or more plugins to
/// `workers`, each bound to `sink` if it wants to publish.
pub type RegisterFn =
    fn(&mut Plugins, &SharedSink, &ConfigSections, &Environment) -> anyhow::Result<()>;

/// A named, statically known plugin provider.
#[derive(Clone, Copy)]
pub struct Provider {
    pub name: &'static str,
    pub register: RegisterFn,
}

impl Provider {
    pub const fn new(name: &'static str, register: RegisterFn) -> Self {
        Self { name, register }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Provider").field(&self.name).finish()
    }
}

/// Invoke every provider in order. The first failure aborts registration;
/// plugins already appended stay in `workers` so the caller can close them.
pub fn register_plugins(
    providers: &[Provider],
    workers: &mut Plugins,
    sink: &SharedSink,
    config: &ConfigSections,
    env: &Environment,
) -> Result<(), BotError> {
    for provider in providers {
        let before = workers.len();
        (provider.register)(workers, sink, config, env).map_err(|source| {
            BotError::Registration {
                provider: provider.name,
                source,
            }
        })?;
        let added = &workers[before..];
        debug!(
            provider = provider.name,
            plugins = ?added.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Provider registered plugins"
        );
    }
    info!(count = workers.len(), "Plugins registered");
    Ok(())
}
