//! Timed plugins: run a task every interval on a private thread.
use std::time::Duration;

use anyhow::Context;
use botbus_core::{
    BotError, ConfigSections, Environment, Event, EventData, Plugin, Plugins, Publisher, SharedSink,
    WorkerThread,
};
use tracing::debug;

// ---------------------------------------------------------------------------
// Generic timer
// ---------------------------------------------------------------------------

/// Threaded plugin calling `tick` every `interval` until closed.
///
/// Has no interest in inbound events.
pub struct TimerPlugin {
    name: String,
    worker: WorkerThread,
}

impl TimerPlugin {
    pub fn spawn<F>(publisher: Publisher, interval: Duration, mut tick: F) -> Result<Self, BotError>
    where
        F: FnMut(&Publisher) + Send + 'static,
    {
        let name = publisher.name().to_string();
        let worker = WorkerThread::spawn(name.clone(), move |stop| {
            while !stop.wait_timeout(interval) {
                tick(&publisher);
            }
        })?;
        Ok(Self { name, worker })
    }
}

impl Plugin for TimerPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_event(&mut self, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        debug!(plugin = %self.name, "Close plugin");
        self.worker.stop_and_join();
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

pub const HEARTBEAT_SECTION: &str = "plugin.heartbeat";

/// Publishes `message` as a status event every `interval`.
pub fn heartbeat(
    publisher: Publisher,
    interval: Duration,
    message: impl Into<String>,
) -> Result<TimerPlugin, BotError> {
    let message = message.into();
    TimerPlugin::spawn(publisher, interval, move |publisher| {
        debug!(plugin = %publisher.name(), "Heartbeat");
        publisher.publish(EventData::status(message.clone()));
    })
}

/// Registers `heartbeat` when both `interval` (seconds) and `message` are configured.
pub fn register_plugins(
    workers: &mut Plugins,
    sink: &SharedSink,
    config: &ConfigSections,
    _env: &Environment,
) -> anyhow::Result<()> {
    let Some(section) = config.get(HEARTBEAT_SECTION) else {
        return Ok(());
    };
    let interval = section.get("interval").filter(|v| !v.is_empty());
    let message = section.get("message").filter(|v| !v.is_empty());
    if let (Some(interval), Some(message)) = (interval, message) {
        let secs: f64 = interval
            .trim()
            .parse()
            .with_context(|| format!("invalid heartbeat interval '{}'", interval))?;
        let interval = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("invalid heartbeat interval '{}'", secs))?;
        let publisher = Publisher::new("heartbeat", Some(sink.clone()));
        workers.push(Box::new(heartbeat(publisher, interval, message.as_str())?));
    }
    Ok(())
}
