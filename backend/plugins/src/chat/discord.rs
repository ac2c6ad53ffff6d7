//! Discord REST backend.
//!
//! Reads a single channel with the `after` cursor and answers through the
//! channel messages endpoint. When that channel is a direct message channel,
//! its messages count as direct.

use anyhow::{Context, Result};
use async_trait::async_trait;
use botbus_core::ChannelId;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{partition_text, ChatBackend, IncomingMessage};

const API_BASE: &str = "https://discord.com/api/v10";

/// Discord's per-message character limit.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Longer replies are cut after this many messages.
pub const MAX_MESSAGE_PARTS: usize = 5;

/// Channel type of a one-to-one conversation.
const DM_CHANNEL: u8 = 1;

#[derive(Deserialize, Debug)]
struct User {
    id: String,
    username: String,
}

#[derive(Deserialize, Debug)]
struct Channel {
    #[serde(rename = "type")]
    kind: u8,
}

#[derive(Deserialize, Debug)]
struct DiscordMessage {
    id: String,
    #[serde(default)]
    content: String,
    author: User,
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

pub struct DiscordBackend {
    http_client: Client,
    token: String,
    channel: u64,
    user_id: Option<String>,
    direct: bool,
    /// Id of the newest message already seen.
    after: Option<String>,
}

impl DiscordBackend {
    pub fn new(token: String, channel: u64) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build Discord HTTP client")?;
        Ok(Self {
            http_client,
            token,
            channel,
            user_id: None,
            direct: false,
            after: None,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Authorization", format!("Bot {}", self.token))
    }

    /// Discord channel ids are numbers; a named id belongs to another service.
    fn target_channel(&self, channel: Option<&ChannelId>) -> u64 {
        match channel {
            Some(ChannelId::Number(id)) => *id,
            Some(ChannelId::Name(name)) => name.parse().unwrap_or(self.channel),
            None => self.channel,
        }
    }

    fn messages_url(&self, channel: u64) -> String {
        format!("{}/channels/{}/messages", API_BASE, channel)
    }

    async fn fetch(&self, query: &[(&str, &str)]) -> Result<Vec<DiscordMessage>> {
        let messages = self
            .authorized(self.http_client.get(self.messages_url(self.channel)))
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("malformed channel messages response")?;
        Ok(messages)
    }

    /// Keep messages not written by us, oldest first, and advance the cursor.
    fn accept(&mut self, mut messages: Vec<DiscordMessage>) -> Vec<IncomingMessage> {
        messages.sort_by_key(|m| snowflake(&m.id));
        if let Some(newest) = messages.last() {
            self.after = Some(newest.id.clone());
        }
        messages
            .into_iter()
            .filter(|m| Some(&m.author.id) != self.user_id.as_ref())
            .map(|m| IncomingMessage {
                text: m.content,
                channel: ChannelId::Number(self.channel),
                is_direct: self.direct,
            })
            .collect()
    }
}

fn snowflake(id: &str) -> u64 {
    id.parse().unwrap_or(0)
}

#[async_trait]
impl ChatBackend for DiscordBackend {
    fn service(&self) -> &'static str {
        "Discord"
    }

    async fn login(&mut self) -> Result<String> {
        let user: User = self
            .authorized(self.http_client.get(format!("{}/users/@me", API_BASE)))
            .send()
            .await?
            .error_for_status()
            .context("Discord login rejected")?
            .json()
            .await
            .context("malformed users/@me response")?;
        self.user_id = Some(user.id);

        let channel: Channel = self
            .authorized(self.http_client.get(format!("{}/channels/{}", API_BASE, self.channel)))
            .send()
            .await?
            .error_for_status()
            .context("Discord channel not accessible")?
            .json()
            .await
            .context("malformed channel response")?;
        self.direct = channel.kind == DM_CHANNEL;

        // start after the newest existing message
        let latest = self.fetch(&[("limit", "1")]).await?;
        self.after = latest.first().map(|m| m.id.clone());
        Ok(user.username)
    }

    async fn poll(&mut self) -> Result<Vec<IncomingMessage>> {
        let messages = match self.after.clone() {
            Some(after) => self.fetch(&[("after", after.as_str()), ("limit", "50")]).await?,
            None => self.fetch(&[("limit", "50")]).await?,
        };
        Ok(self.accept(messages))
    }

    async fn send(&mut self, channel: Option<&ChannelId>, text: &str) -> Result<()> {
        let channel = self.target_channel(channel);
        for part in partition_text(text, MAX_MESSAGE_CHARS, MAX_MESSAGE_PARTS) {
            self.authorized(self.http_client.post(self.messages_url(channel)))
                .json(&CreateMessage { content: &part })
                .send()
                .await?
                .error_for_status()
                .context("Discord rejected message")?;
        }
        debug!(channel, "Sent Discord message");
        Ok(())
    }
}
