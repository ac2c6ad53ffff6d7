use std::sync::Arc;

use tracing::{debug, warn};

use crate::event::{Event, EventData};
use crate::queue::QueueSender;

/// Destination for published events. The bus queue is the production sink;
/// tests substitute recording sinks.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

pub type SharedSink = Arc<dyn EventSink>;

impl EventSink for QueueSender<Event> {
    fn publish(&self, event: Event) {
        if let Err(event) = self.enqueue(event) {
            if self.is_closed() {
                debug!(%event, "Bot event queue is closed, dropping event");
            } else {
                warn!(%event, "Bot event queue is full, dropping event");
            }
        }
    }
}

/// Publish port handed to a plugin at construction.
///
/// Carries the plugin's name so every emitted [`Event`] is stamped with its
/// publisher. Without a sink the plugin is a pure subscriber and publishing
/// is a no-op.
#[derive(Clone)]
pub struct Publisher {
    name: String,
    sink: Option<SharedSink>,
}

impl Publisher {
    pub fn new(name: impl Into<String>, sink: Option<SharedSink>) -> Self {
        Self {
            name: name.into(),
            sink,
        }
    }

    /// A publisher that never emits.
    pub fn sink_only(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn can_publish(&self) -> bool {
        self.sink.is_some()
    }

    pub fn publish(&self, data: EventData) {
        if let Some(sink) = &self.sink {
            sink.publish(Event::new(self.name.clone(), data));
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.name)
            .field("can_publish", &self.can_publish())
            .finish()
    }
}

/// Capability every unit on the bus implements.
///
/// `apply_event` runs on the dispatcher's thread, one call at a time, and must
/// return quickly; slow work belongs on the plugin's own thread. `close` is
/// called exactly once by the dispatcher at shutdown and must tolerate being
/// called again.
pub trait Plugin: Send {
    /// Unique name among registered plugins; fixed for the plugin's lifetime.
    fn name(&self) -> &str;

    fn apply_event(&mut self, event: &Event) -> anyhow::Result<()>;

    fn close(&mut self) {
        debug!(plugin = %self.name(), "Close plugin");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Sink that records everything published into it.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<Event>>,
    }

    impl EventSink for RecordingSink {
        fn publish(&self, event: Event) {
            self.events.lock().push(event);
        }
    }
}
