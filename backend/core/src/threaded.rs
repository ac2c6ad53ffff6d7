//! Private worker thread with cooperative shutdown.
//!
//! A plugin with background work embeds a [`WorkerThread`] and calls
//! [`WorkerThread::stop_and_join`] from its `close`.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::BotError;
use crate::signal::StopSignal;

/// How long `close` waits for a worker to finish before detaching it.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WorkerThread {
    name: String,
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
    // Disconnects when the worker returns or unwinds.
    finished: Option<mpsc::Receiver<()>>,
    join_timeout: Duration,
}

impl WorkerThread {
    /// Start `routine` on a dedicated thread named `name`.
    ///
    /// The routine receives the stop signal and is expected to poll it
    /// (`wait_timeout` between units of work) to end voluntarily.
    pub fn spawn<F>(name: impl Into<String>, routine: F) -> Result<Self, BotError>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let name = name.into();
        let stop = StopSignal::new();
        let worker_stop = stop.clone();
        let (finished_tx, finished_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _finished = finished_tx;
                routine(worker_stop);
            })
            .map_err(|source| BotError::Spawn {
                plugin: name.clone(),
                source,
            })?;

        debug!(plugin = %name, "Worker thread started");
        Ok(Self {
            name,
            stop,
            handle: Some(handle),
            finished: Some(finished_rx),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        })
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Set the stop signal and wait up to the join timeout for the thread.
    ///
    /// Returns `false` if the worker was still running when the wait ran out;
    /// it is then left detached. Calling this again is a no-op returning `true`.
    pub fn stop_and_join(&mut self) -> bool {
        self.stop.set();
        let (Some(handle), Some(finished)) = (self.handle.take(), self.finished.take()) else {
            return true;
        };

        match finished.recv_timeout(self.join_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    plugin = %self.name,
                    timeout_secs = self.join_timeout.as_secs_f64(),
                    "Worker thread did not stop in time, detaching"
                );
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!(plugin = %self.name, "Worker thread panicked");
                }
                debug!(plugin = %self.name, "Worker thread stopped");
                true
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.stop.set();
    }
}
