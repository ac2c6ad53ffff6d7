//! Chat connectors.
//!
//! A [`ChatPlugin`] owns a worker thread that logs into a chat service, sends
//! queued outbound messages and turns prefixed inbound text into
//! `ChatCommand` events. The service itself sits behind [`ChatBackend`].

pub mod discord;
pub mod slack;

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use botbus_core::{
    BotError, ChannelId, ConfigSections, Environment, Event, EventData, EventQueue, Plugin, Plugins,
    Publisher, QueueSender, SharedSink, StopSignal, WorkerThread,
};
use tracing::{debug, error, info, warn};

pub use discord::DiscordBackend;
pub use slack::SlackBackend;

/// Text starting with this is treated as a command.
pub const COMMAND_PREFIX: &str = "$";

/// Separates several commands in one message.
pub const COMMAND_SEPARATOR: &str = "&&";

/// Capacity of a chat plugin's outbound queue.
pub const OUTBOX_CAPACITY: usize = 256;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub const CHAT_SECTION: &str = "plugin.chat";

/// Answer to direct messages that are not commands.
pub const COMMAND_ONLY_HINT: &str =
    "Hi there. I am a command processing bot, reacting to messages with prefix \"$\". No smalltalk!";

/// Split `$cmd1 && cmd2` into trimmed, non-empty commands.
/// Returns `None` when the text is not a command.
pub fn parse_commands(text: &str) -> Option<Vec<String>> {
    let body = text.strip_prefix(COMMAND_PREFIX)?;
    Some(
        body.split(COMMAND_SEPARATOR)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect(),
    )
}

/// Split `text` into chunks of at most `limit` characters, keeping at most `max_parts` chunks.
pub fn partition_text(text: &str, limit: usize, max_parts: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit.max(1))
        .take(max_parts)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    /// `None` means the backend's default channel.
    pub channel: Option<ChannelId>,
}

/// A message read from the chat service, already filtered of our own posts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub text: String,
    pub channel: ChannelId,
    /// Sent in a one-to-one conversation with the bot.
    pub is_direct: bool,
}

/// Connection to one chat service.
#[async_trait]
pub trait ChatBackend: Send + 'static {
    /// Service name used in status lines ("Slack", "Discord").
    fn service(&self) -> &'static str;

    /// Authenticate and return a description of the bot user.
    async fn login(&mut self) -> anyhow::Result<String>;

    /// Messages that arrived since the previous poll, oldest first per conversation.
    async fn poll(&mut self) -> anyhow::Result<Vec<IncomingMessage>>;

    async fn send(&mut self, channel: Option<&ChannelId>, text: &str) -> anyhow::Result<()>;
}

pub struct ChatPlugin {
    name: String,
    outbox: QueueSender<OutboundMessage>,
    worker: WorkerThread,
}

impl ChatPlugin {
    pub fn spawn<B: ChatBackend>(
        publisher: Publisher,
        backend: B,
        poll_interval: Duration,
    ) -> Result<Self, BotError> {
        let name = publisher.name().to_string();
        let outbox_queue = EventQueue::new(OUTBOX_CAPACITY);
        let outbox = outbox_queue.sender();
        let worker = WorkerThread::spawn(name.clone(), move |stop| {
            run_session(backend, publisher, outbox_queue, stop, poll_interval)
        })?;
        Ok(Self {
            name,
            outbox,
            worker,
        })
    }
}

impl Plugin for ChatPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_event(&mut self, event: &Event) -> anyhow::Result<()> {
        if let EventData::ChatOutput {
            text,
            target_publisher,
            target_channel,
        } = event.data()
        {
            if target_publisher.as_deref().map_or(true, |t| t == self.name) {
                let message = OutboundMessage {
                    text: text.clone(),
                    channel: target_channel.clone(),
                };
                if self.outbox.enqueue(message).is_err() {
                    if self.outbox.is_closed() {
                        debug!(plugin = %self.name, %event, "Chat session is not running, dropping message");
                    } else {
                        warn!(plugin = %self.name, %event, "Message queue is full, dropping message");
                    }
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        debug!(plugin = %self.name, "Close plugin");
        self.worker.stop_and_join();
    }
}

fn run_session<B: ChatBackend>(
    backend: B,
    publisher: Publisher,
    outbox: EventQueue<OutboundMessage>,
    stop: StopSignal,
    poll_interval: Duration,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(plugin = %publisher.name(), error = %e, "Cannot start chat runtime");
            return;
        }
    };
    runtime.block_on(session(backend, publisher, outbox, stop, poll_interval));
}

async fn session<B: ChatBackend>(
    mut backend: B,
    publisher: Publisher,
    mut outbox: EventQueue<OutboundMessage>,
    stop: StopSignal,
    poll_interval: Duration,
) {
    let plugin = publisher.name().to_string();
    match backend.login().await {
        Ok(user) => {
            info!(plugin = %plugin, user = %user, "Chat login");
            publisher.publish(EventData::status(format!("{} login: {}", backend.service(), user)));
        }
        Err(e) => {
            error!(plugin = %plugin, error = %e, "Chat login failed");
            return;
        }
    }

    while !stop.is_set() {
        while let Some(message) = outbox.dequeue(None).await {
            if message.text.is_empty() {
                continue;
            }
            if let Err(e) = backend.send(message.channel.as_ref(), &message.text).await {
                error!(plugin = %plugin, error = %e, "Chat send failed");
            }
        }

        match backend.poll().await {
            Ok(messages) => {
                for message in messages {
                    match parse_commands(&message.text) {
                        Some(commands) => {
                            for command in commands {
                                publisher.publish(EventData::command(command, message.channel.clone()));
                            }
                        }
                        None if message.is_direct => {
                            if let Err(e) = backend.send(Some(&message.channel), COMMAND_ONLY_HINT).await {
                                error!(plugin = %plugin, error = %e, "Chat hint failed");
                            }
                        }
                        None => {}
                    }
                }
            }
            Err(e) => warn!(plugin = %plugin, error = %e, "Chat poll failed"),
        }

        tokio::time::sleep(poll_interval).await;
    }
    debug!(plugin = %plugin, "Chat session ended");
}

fn credential<'a>(env: &'a Environment, key: &str) -> Option<&'a String> {
    env.get(key).filter(|v| !v.trim().is_empty())
}

/// Registers Slack and Discord connectors for which credentials are present in the environment.
pub fn register_plugins(
    workers: &mut Plugins,
    sink: &SharedSink,
    config: &ConfigSections,
    env: &Environment,
) -> anyhow::Result<()> {
    let poll_interval = match config.get(CHAT_SECTION).and_then(|s| s.get("poll_interval")) {
        Some(secs) => secs
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .with_context(|| format!("invalid chat poll interval '{}'", secs))?,
        None => DEFAULT_POLL_INTERVAL,
    };

    if let (Some(token), Some(channel)) = (credential(env, "DISCORD_TOKEN"), credential(env, "DISCORD_CHANNEL_ID")) {
        let channel: u64 = channel
            .trim()
            .parse()
            .with_context(|| format!("invalid DISCORD_CHANNEL_ID '{}'", channel))?;
        let backend = DiscordBackend::new(token.clone(), channel)?;
        let publisher = Publisher::new("discord", Some(sink.clone()));
        workers.push(Box::new(ChatPlugin::spawn(publisher, backend, poll_interval)?));
    }

    if let (Some(token), Some(channel)) = (credential(env, "SLACK_TOKEN"), credential(env, "SLACK_CHANNEL_ID")) {
        let backend = SlackBackend::new(token.clone(), channel.clone())?;
        let publisher = Publisher::new("slack", Some(sink.clone()));
        workers.push(Box::new(ChatPlugin::spawn(publisher, backend, poll_interval)?));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct FakeBackend {
        inbox: Arc<Mutex<Vec<IncomingMessage>>>,
        sent: Arc<Mutex<Vec<(Option<ChannelId>, String)>>>,
        fail_login: bool,
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        fn service(&self) -> &'static str {
            "Fake"
        }

        async fn login(&mut self) -> anyhow::Result<String> {
            if self.fail_login {
                anyhow::bail!("bad token");
            }
            Ok("bot#0001".to_string())
        }

        async fn poll(&mut self) -> anyhow::Result<Vec<IncomingMessage>> {
            Ok(std::mem::take(&mut *self.inbox.lock()))
        }

        async fn send(&mut self, channel: Option<&ChannelId>, text: &str) -> anyhow::Result<()> {
            self.sent.lock().push((channel.cloned(), text.to_string()));
            Ok(())
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn spawn_fake(sink: &Arc<RecordingSink>, backend: FakeBackend) -> ChatPlugin {
        let publisher = Publisher::new("fake", Some(sink.clone() as SharedSink));
        ChatPlugin::spawn(publisher, backend, Duration::from_millis(5)).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_commands("$git && help &&  git app main ").unwrap(),
            ["git", "help", "git app main"]
        );
        assert_eq!(parse_commands("$ help").unwrap(), ["help"]);
        assert!(parse_commands("$ && ").unwrap().is_empty());
        assert!(parse_commands("hello bot").is_none());
        assert!(parse_commands(" $help").is_none());
    }

    #[test]
    fn test_partition_text() {
        let long = "0123456789".repeat(201);
        let parts = partition_text(&long, 2000, 5);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 2000);
        assert_eq!(parts[1], "0123456789");

        assert_eq!(partition_text(&"x".repeat(50), 10, 3).len(), 3);
        assert!(partition_text("", 10, 3).is_empty());
        // multi-byte characters are never split
        assert_eq!(partition_text("ääää", 3, 5), ["äää", "ä"]);
    }

    #[test]
    fn test_login_status_and_inbound_commands() {
        let sink = Arc::new(RecordingSink::default());
        let backend = FakeBackend::default();
        backend.inbox.lock().extend([
            IncomingMessage {
                text: "$help && git".into(),
                channel: ChannelId::from("C1"),
                is_direct: false,
            },
            IncomingMessage {
                text: "just chatting".into(),
                channel: ChannelId::from("C1"),
                is_direct: false,
            },
        ]);
        let sent = backend.sent.clone();
        let mut plugin = spawn_fake(&sink, backend);

        assert!(wait_until(|| sink.len() >= 3));
        plugin.close();
        // small talk in a shared channel gets no answer
        assert!(sent.lock().is_empty());

        let events = sink.events();
        assert_eq!(events[0].data(), &EventData::status("Fake login: bot#0001"));
        assert_eq!(events[1].data(), &EventData::command("help", "C1"));
        assert_eq!(events[2].data(), &EventData::command("git", "C1"));
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.publisher() == "fake"));
    }

    #[test]
    fn test_outbound_messages_respect_target_publisher() {
        let sink = Arc::new(RecordingSink::default());
        let backend = FakeBackend::default();
        let sent = backend.sent.clone();
        let mut plugin = spawn_fake(&sink, backend);

        let to_us = Event::new("git", EventData::reply("Branches: main", "fake", &ChannelId::from(9u64)));
        let to_other = Event::new("git", EventData::reply("not ours", "slack", &ChannelId::from(9u64)));
        let broadcast = Event::new("webhook", EventData::broadcast("to everyone"));
        plugin.apply_event(&to_us).unwrap();
        plugin.apply_event(&to_other).unwrap();
        plugin.apply_event(&broadcast).unwrap();
        plugin.apply_event(&Event::new("heartbeat", EventData::status("ignored"))).unwrap();

        assert!(wait_until(|| sent.lock().len() >= 2));
        plugin.close();

        assert_eq!(
            *sent.lock(),
            [
                (Some(ChannelId::Number(9)), "Branches: main".to_string()),
                (None, "to everyone".to_string()),
            ]
        );
    }

    #[test]
    fn test_failed_login_ends_worker_quietly() {
        let sink = Arc::new(RecordingSink::default());
        let backend = FakeBackend {
            fail_login: true,
            ..FakeBackend::default()
        };
        let mut plugin = spawn_fake(&sink, backend);
        assert!(wait_until(|| plugin.worker.is_finished()));

        // the outbox consumer is gone; output is dropped without error
        assert!(plugin.outbox.is_closed());
        plugin.apply_event(&Event::new("git", EventData::broadcast("nobody listens"))).unwrap();

        plugin.close();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_direct_small_talk_gets_the_hint() {
        let sink = Arc::new(RecordingSink::default());
        let backend = FakeBackend::default();
        backend.inbox.lock().extend([
            IncomingMessage {
                text: "hello there".into(),
                channel: ChannelId::from("D7"),
                is_direct: true,
            },
            IncomingMessage {
                text: "$help".into(),
                channel: ChannelId::from("D7"),
                is_direct: true,
            },
        ]);
        let sent = backend.sent.clone();
        let mut plugin = spawn_fake(&sink, backend);

        assert!(wait_until(|| sink.len() >= 2 && !sent.lock().is_empty()));
        plugin.close();

        assert_eq!(
            *sent.lock(),
            [(Some(ChannelId::from("D7")), COMMAND_ONLY_HINT.to_string())]
        );
        assert_eq!(sink.events()[1].data(), &EventData::command("help", "D7"));
        assert!(COMMAND_ONLY_HINT.contains(&format!("\"{}\"", COMMAND_PREFIX)));
    }

    #[test]
    fn test_register_uses_environment_credentials() {
        let sink: SharedSink = Arc::new(RecordingSink::default());
        let mut workers = Plugins::new();
        register_plugins(&mut workers, &sink, &ConfigSections::new(), &Environment::new()).unwrap();
        assert!(workers.is_empty());

        let mut env = Environment::new();
        env.insert("DISCORD_TOKEN".into(), "token".into());
        env.insert("DISCORD_CHANNEL_ID".into(), "general".into());
        assert!(register_plugins(&mut workers, &sink, &ConfigSections::new(), &env).is_err());
        assert!(workers.is_empty());
    }

    #[test]
    fn test_blank_credentials_register_nothing() {
        let sink: SharedSink = Arc::new(RecordingSink::default());
        let mut workers = Plugins::new();
        let mut env = Environment::new();
        env.insert("DISCORD_TOKEN".into(), "".into());
        env.insert("DISCORD_CHANNEL_ID".into(), "55".into());
        env.insert("SLACK_TOKEN".into(), "xoxb-test".into());
        env.insert("SLACK_CHANNEL_ID".into(), " ".into());

        register_plugins(&mut workers, &sink, &ConfigSections::new(), &env).unwrap();
        assert!(workers.is_empty());
    }
}
