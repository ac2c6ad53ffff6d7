//! Structured logging setup for botbus.
//!
//! Console output in text or JSON, an optional daily-rolling NDJSON file, and
//! `RUST_LOG`-based level control.

pub mod logger;

pub use logger::{init_logging, LogFormat, LoggingSettings};
