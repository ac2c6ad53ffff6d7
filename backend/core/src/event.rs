use std::fmt;

use serde::{Deserialize, Serialize};

/// Channel a chat message arrived on or should be sent to.
///
/// Chat services disagree on the shape of their identifiers: some use
/// opaque strings, others numeric snowflakes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelId {
    Number(u64),
    Name(String),
}

impl From<u64> for ChannelId {
    fn from(id: u64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self::Name(id.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self::Name(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Number(id) => write!(f, "{}", id),
            ChannelId::Name(id) => f.write_str(id),
        }
    }
}

/// Payload carried by an [`Event`].
///
/// Marked `non_exhaustive`: consumers outside this crate keep a wildcard arm
/// and treat variants they do not know as no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum EventData {
    /// A command parsed from chat input.
    ChatCommand { command: String, channel: ChannelId },
    /// Text to emit into a chat. `target_publisher: None` means any chat plugin may send it.
    ChatOutput {
        text: String,
        target_publisher: Option<String>,
        target_channel: Option<ChannelId>,
    },
    /// Free-text status line (login confirmation, heartbeat, ...).
    Status { status: String },
}

impl EventData {
    pub fn status(status: impl Into<String>) -> Self {
        Self::Status { status: status.into() }
    }

    pub fn command(command: impl Into<String>, channel: impl Into<ChannelId>) -> Self {
        Self::ChatCommand {
            command: command.into(),
            channel: channel.into(),
        }
    }

    /// Output addressed to the plugin and channel a command came from.
    pub fn reply(text: impl Into<String>, publisher: &str, channel: &ChannelId) -> Self {
        Self::ChatOutput {
            text: text.into(),
            target_publisher: Some(publisher.to_string()),
            target_channel: Some(channel.clone()),
        }
    }

    /// Output any chat plugin may deliver to its default channel.
    pub fn broadcast(text: impl Into<String>) -> Self {
        Self::ChatOutput {
            text: text.into(),
            target_publisher: None,
            target_channel: None,
        }
    }
}

/// An immutable message exchanged between plugins through the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    publisher: String,
    data: EventData,
}

impl Event {
    pub fn new(publisher: impl Into<String>, data: EventData) -> Self {
        Self {
            publisher: publisher.into(),
            data,
        }
    }

    /// Name of the plugin that published this event.
    pub fn publisher(&self) -> &str {
        &self.publisher
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}
