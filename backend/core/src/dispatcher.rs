//! Dispatcher: registration, the delivery loop, and guaranteed teardown.

use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::BotError;
use crate::event::Event;
use crate::plugin::SharedSink;
use crate::queue::EventQueue;
use crate::registry::{register_plugins, ConfigSections, Environment, Plugins, Provider};
use crate::signal::StopSignal;

/// Capacity of the bus queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Upper bound on a single dequeue wait; also how often the stop signal is checked.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What the loop does when a plugin's `apply_event` fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerPolicy {
    /// End the run with the error. Teardown still happens.
    #[default]
    FailFast,
    /// Log the error (or panic) and keep delivering to the remaining plugins.
    Isolate,
}

impl FromStr for HandlerPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_fast" | "fail-fast" => Ok(Self::FailFast),
            "isolate" => Ok(Self::Isolate),
            other => anyhow::bail!("unknown handler policy '{}'", other),
        }
    }
}

/// Closes every registered plugin, in registration order, when dropped.
#[derive(Default)]
struct Teardown {
    plugins: Plugins,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        for plugin in &mut self.plugins {
            plugin.close();
        }
        debug!(count = self.plugins.len(), "Plugins closed");
    }
}

pub struct Dispatcher {
    providers: Vec<Provider>,
    queue_capacity: usize,
    poll_interval: Duration,
    policy: HandlerPolicy,
    handle_interrupt: bool,
}

impl Dispatcher {
    pub fn new(providers: impl Into<Vec<Provider>>) -> Self {
        Self {
            providers: providers.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            policy: HandlerPolicy::default(),
            handle_interrupt: true,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_handler_policy(mut self, policy: HandlerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether Ctrl-C ends the loop. On by default.
    pub fn with_interrupt_handling(mut self, enabled: bool) -> Self {
        self.handle_interrupt = enabled;
        self
    }

    pub fn policy(&self) -> HandlerPolicy {
        self.policy
    }

    /// Register plugins, deliver events until `stop` is set or the process is
    /// interrupted, then close every plugin.
    ///
    /// Every plugin constructed during registration has been closed exactly
    /// once when this returns, whichever way it returns.
    pub async fn run(
        &self,
        config: &ConfigSections,
        env: &Environment,
        stop: Option<StopSignal>,
    ) -> Result<(), BotError> {
        debug!(?config, "Configuration");
        debug!(keys = ?env.keys().collect::<Vec<_>>(), "Environment (keys only)");

        let mut queue = EventQueue::new(self.queue_capacity);
        let sink: SharedSink = Arc::new(queue.sender());

        let mut workers = Teardown::default();
        register_plugins(&self.providers, &mut workers.plugins, &sink, config, env)?;
        if workers.plugins.is_empty() {
            info!("No plugins registered, nothing to dispatch");
            return Ok(());
        }

        let result = self
            .process_events(&mut workers.plugins, &mut queue, stop.as_ref())
            .await;
        if let Err(e) = &result {
            error!(error = %e, "Event loop aborted");
        }
        result
    }

    async fn process_events(
        &self,
        plugins: &mut Plugins,
        queue: &mut EventQueue<Event>,
        stop: Option<&StopSignal>,
    ) -> Result<(), BotError> {
        let mut listen_interrupt = self.handle_interrupt;
        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);

        while !stop.is_some_and(StopSignal::is_set) {
            let event = tokio::select! {
                result = &mut interrupt, if listen_interrupt => {
                    match result {
                        Ok(()) => {
                            info!("Interrupted, stopping event loop");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "Cannot listen for interrupts");
                            listen_interrupt = false;
                            None
                        }
                    }
                }
                event = queue.dequeue(Some(self.poll_interval)) => event,
            };

            if let Some(event) = event {
                self.deliver(plugins, &event)?;
            }
        }
        Ok(())
    }

    /// Hand `event` to every plugin except its publisher, in registration order.
    fn deliver(&self, plugins: &mut Plugins, event: &Event) -> Result<(), BotError> {
        for plugin in plugins.iter_mut().filter(|p| p.name() != event.publisher()) {
            match self.policy {
                HandlerPolicy::FailFast => {
                    plugin.apply_event(event).map_err(|source| BotError::Handler {
                        plugin: plugin.name().to_string(),
                        source,
                    })?;
                }
                HandlerPolicy::Isolate => {
                    match panic::catch_unwind(AssertUnwindSafe(|| plugin.apply_event(event))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!(plugin = %plugin.name(), error = %e, "Event handler failed")
                        }
                        Err(_) => error!(plugin = %plugin.name(), "Event handler panicked"),
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventData;
    use crate::plugin::{Plugin, Publisher};
    use crate::registry::RegisterFn;
    use crate::threaded::WorkerThread;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Per-test observation log shared by the scripted plugins.
    #[derive(Default)]
    struct Journal {
        applied: Mutex<Vec<(String, Event)>>,
        closed: Mutex<Vec<String>>,
    }

    struct Scripted {
        publisher: Publisher,
        journal: Arc<Journal>,
        fail: bool,
        panic: bool,
    }

    impl Plugin for Scripted {
        fn name(&self) -> &str {
            self.publisher.name()
        }

        fn apply_event(&mut self, event: &Event) -> anyhow::Result<()> {
            self.journal
                .applied
                .lock()
                .push((self.name().to_string(), event.clone()));
            if self.panic {
                panic!("scripted panic");
            }
            if self.fail {
                anyhow::bail!("scripted failure");
            }
            Ok(())
        }

        fn close(&mut self) {
            self.journal.closed.lock().push(self.name().to_string());
        }
    }

    /// Publishes one status event from its worker thread, then idles.
    struct Announcer {
        worker: WorkerThread,
        journal: Arc<Journal>,
    }

    impl Plugin for Announcer {
        fn name(&self) -> &str {
            "announcer"
        }

        fn apply_event(&mut self, event: &Event) -> anyhow::Result<()> {
            self.journal
                .applied
                .lock()
                .push(("announcer".to_string(), event.clone()));
            Ok(())
        }

        fn close(&mut self) {
            self.worker.stop_and_join();
            self.journal.closed.lock().push("announcer".to_string());
        }
    }

    // Providers are plain fn pointers, so each test gets its own journal slot.
    static JOURNALS: Mutex<Vec<Arc<Journal>>> = parking_lot::const_mutex(Vec::new());
    static CURRENT: AtomicUsize = AtomicUsize::new(0);

    fn journal_for(index: usize) -> Arc<Journal> {
        let mut journals = JOURNALS.lock();
        while journals.len() <= index {
            journals.push(Arc::new(Journal::default()));
        }
        journals[index].clone()
    }

    fn fresh_journal() -> (usize, Arc<Journal>) {
        let index = CURRENT.fetch_add(1, Ordering::SeqCst);
        (index, journal_for(index))
    }

    fn scripted(name: &str, sink: Option<&SharedSink>, journal: Arc<Journal>) -> Box<Scripted> {
        Box::new(Scripted {
            publisher: Publisher::new(name, sink.cloned()),
            journal,
            fail: false,
            panic: false,
        })
    }

    fn index_of(config: &ConfigSections) -> usize {
        config
            .get("test")
            .and_then(|s| s.get("journal"))
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    fn config_for(index: usize) -> ConfigSections {
        let mut config = ConfigSections::new();
        config
            .entry("test".into())
            .or_default()
            .insert("journal".into(), index.to_string());
        config
    }

    fn announcer_and_listener(
        workers: &mut Plugins,
        sink: &SharedSink,
        config: &ConfigSections,
        _env: &Environment,
    ) -> anyhow::Result<()> {
        let journal = journal_for(index_of(config));
        let publisher = Publisher::new("announcer", Some(sink.clone()));
        let worker = WorkerThread::spawn("announcer", move |stop| {
            publisher.publish(EventData::status("hello"));
            stop.wait_timeout(Duration::from_secs(30));
        })?;
        workers.push(Box::new(Announcer {
            worker,
            journal: journal.clone(),
        }));
        workers.push(scripted("listener", None, journal));
        Ok(())
    }

    fn failing_then_healthy(
        workers: &mut Plugins,
        sink: &SharedSink,
        config: &ConfigSections,
        _env: &Environment,
    ) -> anyhow::Result<()> {
        let journal = journal_for(index_of(config));
        let mut failing = scripted("failing", None, journal.clone());
        failing.fail = true;
        let mut panicking = scripted("panicking", None, journal.clone());
        panicking.panic = true;
        workers.push(failing);
        workers.push(panicking);
        workers.push(scripted("healthy", None, journal.clone()));

        // Seed the bus with two events from a plugin that is not registered.
        let outsider = Publisher::new("outsider", Some(sink.clone()));
        outsider.publish(EventData::status("one"));
        outsider.publish(EventData::status("two"));
        Ok(())
    }

    fn idle_pair(
        workers: &mut Plugins,
        _sink: &SharedSink,
        config: &ConfigSections,
        _env: &Environment,
    ) -> anyhow::Result<()> {
        let journal = journal_for(index_of(config));
        workers.push(scripted("first", None, journal.clone()));
        workers.push(scripted("second", None, journal));
        Ok(())
    }

    fn broken(
        _workers: &mut Plugins,
        _sink: &SharedSink,
        _config: &ConfigSections,
        _env: &Environment,
    ) -> anyhow::Result<()> {
        anyhow::bail!("provider exploded")
    }

    fn dispatcher(providers: &[(&'static str, RegisterFn)]) -> Dispatcher {
        let providers: Vec<_> = providers.iter().map(|&(n, f)| Provider::new(n, f)).collect();
        Dispatcher::new(providers)
            .with_poll_interval(Duration::from_millis(20))
            .with_interrupt_handling(false)
    }

    #[tokio::test]
    async fn test_dry_run_returns_promptly() {
        let stop = StopSignal::new();
        stop.set();
        let dispatcher = dispatcher(&[]);
        let started = Instant::now();
        for _ in 0..100 {
            dispatcher
                .run(&ConfigSections::new(), &Environment::new(), Some(stop.clone()))
                .await
                .unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_empty_plugin_list_returns_without_stop_signal() {
        let dispatcher = dispatcher(&[]);
        tokio::time::timeout(
            Duration::from_secs(2),
            dispatcher.run(&ConfigSections::new(), &Environment::new(), None),
        )
        .await
        .expect("run must not block without plugins")
        .unwrap();
    }

    #[tokio::test]
    async fn test_pre_set_stop_still_closes_every_plugin_once() {
        let (index, journal) = fresh_journal();
        let stop = StopSignal::new();
        stop.set();
        dispatcher(&[("idle", idle_pair)])
            .run(&config_for(index), &Environment::new(), Some(stop))
            .await
            .unwrap();

        assert!(journal.applied.lock().is_empty());
        assert_eq!(*journal.closed.lock(), ["first", "second"]);
    }

    #[tokio::test]
    async fn test_event_reaches_others_but_not_publisher() {
        let (index, journal) = fresh_journal();
        let stop = StopSignal::new();
        let remote = stop.clone();
        let watcher = journal.clone();
        tokio::spawn(async move {
            while watcher.applied.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            remote.set();
        });

        tokio::time::timeout(
            Duration::from_secs(10),
            dispatcher(&[("pair", announcer_and_listener)]).run(
                &config_for(index),
                &Environment::new(),
                Some(stop),
            ),
        )
        .await
        .expect("run did not observe the stop signal")
        .unwrap();

        let applied = journal.applied.lock();
        assert_eq!(applied.len(), 1);
        let (receiver, event) = &applied[0];
        assert_eq!(receiver, "listener");
        assert_eq!(event.publisher(), "announcer");
        assert_eq!(event.data(), &EventData::status("hello"));
        assert_eq!(*journal.closed.lock(), ["announcer", "listener"]);
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_but_closes_everything() {
        let (index, journal) = fresh_journal();
        let err = tokio::time::timeout(
            Duration::from_secs(10),
            dispatcher(&[("faulty", failing_then_healthy)]).run(
                &config_for(index),
                &Environment::new(),
                None,
            ),
        )
        .await
        .expect("fail-fast run should end on its own")
        .unwrap_err();

        assert!(matches!(err, BotError::Handler { ref plugin, .. } if plugin == "failing"));
        let receivers: Vec<_> = journal.applied.lock().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(receivers, ["failing"]);
        assert_eq!(*journal.closed.lock(), ["failing", "panicking", "healthy"]);
    }

    #[tokio::test]
    async fn test_isolate_keeps_delivering_past_failures() {
        let (index, journal) = fresh_journal();
        let stop = StopSignal::new();
        let remote = stop.clone();
        let watcher = journal.clone();
        tokio::spawn(async move {
            while watcher.applied.lock().len() < 6 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            remote.set();
        });

        tokio::time::timeout(
            Duration::from_secs(10),
            dispatcher(&[("faulty", failing_then_healthy)])
                .with_handler_policy(HandlerPolicy::Isolate)
                .run(&config_for(index), &Environment::new(), Some(stop)),
        )
        .await
        .expect("isolated run did not observe the stop signal")
        .unwrap();

        let receivers: Vec<_> = journal.applied.lock().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(
            receivers,
            ["failing", "panicking", "healthy", "failing", "panicking", "healthy"]
        );
        assert_eq!(*journal.closed.lock(), ["failing", "panicking", "healthy"]);
    }

    #[tokio::test]
    async fn test_registration_failure_closes_plugins_already_built() {
        let (index, journal) = fresh_journal();
        let err = dispatcher(&[("idle", idle_pair), ("broken", broken)])
            .run(&config_for(index), &Environment::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Registration { provider: "broken", .. }));
        assert_eq!(*journal.closed.lock(), ["first", "second"]);
    }

    #[test]
    fn test_handler_policy_parsing() {
        assert_eq!("fail_fast".parse::<HandlerPolicy>().unwrap(), HandlerPolicy::FailFast);
        assert_eq!(" Isolate ".parse::<HandlerPolicy>().unwrap(), HandlerPolicy::Isolate);
        assert!("ignore".parse::<HandlerPolicy>().is_err());
        assert_eq!(HandlerPolicy::default(), HandlerPolicy::FailFast);
    }
}
