pub mod dispatcher;
pub mod error;
pub mod event;
pub mod plugin;
pub mod queue;
pub mod registry;
pub mod signal;
pub mod threaded;

pub use dispatcher::{Dispatcher, HandlerPolicy, DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY};
pub use error::BotError;
pub use event::{ChannelId, Event, EventData};
pub use plugin::{EventSink, Plugin, Publisher, SharedSink};
pub use queue::{EventQueue, QueueSender};
pub use registry::{register_plugins, ConfigSections, Environment, Plugins, Provider, RegisterFn};
pub use signal::StopSignal;
pub use threaded::{WorkerThread, DEFAULT_JOIN_TIMEOUT};
