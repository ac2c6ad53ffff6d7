//! Built-in botbus plugins.
//!
//! [`providers`] lists every registration function in the order the
//! dispatcher should run them.

pub mod chat;
pub mod git;
pub mod log_sink;
pub mod timer;

use botbus_core::Provider;

pub use chat::{ChatBackend, ChatPlugin, DiscordBackend, SlackBackend};
pub use git::GitPlugin;
pub use log_sink::LogSinkPlugin;
pub use timer::{heartbeat, TimerPlugin};

/// Registration functions of all built-in plugins.
pub fn providers() -> Vec<Provider> {
    vec![
        Provider::new("chat", chat::register_plugins),
        Provider::new("git", git::register_plugins),
        Provider::new("heartbeat", timer::register_plugins),
        Provider::new("logging", log_sink::register_plugins),
    ]
}
