//! Slack Web API backend.
//!
//! Polls `conversations.history` for the configured channel and every direct
//! conversation of the bot user, and posts with `chat.postMessage`.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use botbus_core::ChannelId;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChatBackend, IncomingMessage};

const API_BASE: &str = "https://slack.com/api";

/// Slack rejects longer message text.
pub const MAX_MESSAGE_CHARS: usize = 40_000;

/// Direct conversations are listed again every this many polls.
const DIRECT_REFRESH_POLLS: u32 = 20;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug)]
struct AuthTest {
    ok: bool,
    error: Option<String>,
    user: Option<String>,
    user_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct History {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    messages: Vec<SlackMessage>,
}

#[derive(Deserialize, Debug, Clone)]
struct SlackMessage {
    ts: String,
    user: Option<String>,
    text: Option<String>,
    subtype: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ConversationList {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    channels: Vec<ConversationRef>,
}

#[derive(Deserialize, Debug)]
struct ConversationRef {
    id: String,
}

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct PostResult {
    ok: bool,
    error: Option<String>,
}

fn check(ok: bool, error: Option<String>, method: &str) -> Result<()> {
    if !ok {
        bail!("{} failed: {}", method, error.unwrap_or_else(|| "unknown error".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Text escaping
// ---------------------------------------------------------------------------

/// Escape the three characters Slack reserves for markup.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn unescape(text: &str) -> String {
    text.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// A polled conversation with its read cursor.
struct Watched {
    id: String,
    direct: bool,
    /// Timestamp of the newest message already seen.
    oldest: String,
}

impl Watched {
    fn new(id: String, direct: bool) -> Self {
        Self {
            id,
            direct,
            oldest: now_ts(),
        }
    }

    /// Keep user messages not written by `own_user`, oldest first, and advance the cursor.
    fn accept(&mut self, mut messages: Vec<SlackMessage>, own_user: Option<&String>) -> Vec<IncomingMessage> {
        messages.sort_by(|a, b| ts_value(&a.ts).total_cmp(&ts_value(&b.ts)));
        if let Some(newest) = messages.last() {
            self.oldest = newest.ts.clone();
        }
        messages
            .into_iter()
            .filter(|m| m.subtype.is_none())
            .filter(|m| m.user.is_some() && m.user.as_ref() != own_user)
            .filter_map(|m| m.text)
            .map(|text| IncomingMessage {
                text: unescape(&text),
                channel: ChannelId::Name(self.id.clone()),
                is_direct: self.direct,
            })
            .collect()
    }
}

pub struct SlackBackend {
    http_client: Client,
    token: String,
    channel: String,
    user_id: Option<String>,
    /// The configured channel first, then direct conversations.
    conversations: Vec<Watched>,
    polls: u32,
}

impl SlackBackend {
    pub fn new(token: String, channel: String) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build Slack HTTP client")?;
        Ok(Self {
            http_client,
            token,
            conversations: vec![Watched::new(channel.clone(), false)],
            channel,
            user_id: None,
            polls: 0,
        })
    }

    /// Slack channel ids are names; a numeric id belongs to another service.
    fn target_channel(&self, channel: Option<&ChannelId>) -> String {
        match channel {
            Some(ChannelId::Name(name)) => name.clone(),
            _ => self.channel.clone(),
        }
    }

    fn watch_direct(&mut self, ids: Vec<String>) {
        for id in ids {
            match self.conversations.iter_mut().find(|c| c.id == id) {
                Some(known) => known.direct = true,
                None => {
                    debug!(channel = %id, "Watching Slack direct conversation");
                    self.conversations.push(Watched::new(id, true));
                }
            }
        }
    }

    async fn history(&self, channel: &str, oldest: &str) -> Result<Vec<SlackMessage>> {
        let history: History = self
            .http_client
            .get(format!("{}/conversations.history", API_BASE))
            .bearer_auth(&self.token)
            .query(&[("channel", channel), ("oldest", oldest)])
            .send()
            .await?
            .json()
            .await
            .context("malformed conversations.history response")?;
        check(history.ok, history.error, "conversations.history")?;
        Ok(history.messages)
    }

    async fn direct_channels(&self) -> Result<Vec<String>> {
        let list: ConversationList = self
            .http_client
            .get(format!("{}/conversations.list", API_BASE))
            .bearer_auth(&self.token)
            .query(&[("types", "im"), ("exclude_archived", "true"), ("limit", "200")])
            .send()
            .await?
            .json()
            .await
            .context("malformed conversations.list response")?;
        check(list.ok, list.error, "conversations.list")?;
        Ok(list.channels.into_iter().map(|c| c.id).collect())
    }
}

fn now_ts() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

fn ts_value(ts: &str) -> f64 {
    ts.parse().unwrap_or(0.0)
}

#[async_trait]
impl ChatBackend for SlackBackend {
    fn service(&self) -> &'static str {
        "Slack"
    }

    async fn login(&mut self) -> Result<String> {
        let auth: AuthTest = self
            .http_client
            .post(format!("{}/auth.test", API_BASE))
            .bearer_auth(&self.token)
            .send()
            .await?
            .json()
            .await
            .context("malformed auth.test response")?;
        check(auth.ok, auth.error, "auth.test")?;
        self.user_id = auth.user_id;
        Ok(auth.user.unwrap_or_default())
    }

    async fn poll(&mut self) -> Result<Vec<IncomingMessage>> {
        if self.polls % DIRECT_REFRESH_POLLS == 0 {
            match self.direct_channels().await {
                Ok(ids) => self.watch_direct(ids),
                Err(e) => warn!(error = %e, "Cannot list Slack direct conversations"),
            }
        }
        self.polls = self.polls.wrapping_add(1);

        let mut incoming = Vec::new();
        for index in 0..self.conversations.len() {
            let (id, oldest) = {
                let conversation = &self.conversations[index];
                (conversation.id.clone(), conversation.oldest.clone())
            };
            match self.history(&id, &oldest).await {
                Ok(messages) => {
                    incoming.extend(self.conversations[index].accept(messages, self.user_id.as_ref()))
                }
                // the configured channel must stay readable
                Err(e) if index == 0 => return Err(e),
                Err(e) => warn!(channel = %id, error = %e, "Cannot read Slack direct conversation"),
            }
        }
        Ok(incoming)
    }

    async fn send(&mut self, channel: Option<&ChannelId>, text: &str) -> Result<()> {
        let channel = self.target_channel(channel);
        let text: String = escape(text).chars().take(MAX_MESSAGE_CHARS).collect();
        let result: PostResult = self
            .http_client
            .post(format!("{}/chat.postMessage", API_BASE))
            .bearer_auth(&self.token)
            .json(&PostMessage {
                channel: &channel,
                text: &text,
            })
            .send()
            .await?
            .json()
            .await
            .context("malformed chat.postMessage response")?;
        check(result.ok, result.error, "chat.postMessage")?;
        debug!(channel = %channel, "Sent Slack message");
        Ok(())
    }
}
