//! Log sink collaborator.
//!
//! The presentation layer owns a [`LogSink`]; every component reports
//! user-facing messages into it. [`EventLog`] pairs each message with a
//! `log` record so the host's subscriber sees the same events.

use std::sync::{Arc, Mutex};

/// Receives one human-readable message at a time.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _message: &str) {}
}

/// Sink that keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, message: &str) {
        if let Ok(mut m) = self.messages.lock() {
            m.push(message.to_string());
        }
    }
}

/// Cloneable handle used by components to report events.
#[derive(Clone)]
pub struct EventLog {
    sink: Arc<dyn LogSink>,
}

impl EventLog {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::info!("{}", message);
        self.sink.log(message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::warn!("{}", message);
        self.sink.log(message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::error!("{}", message);
        self.sink.log(message);
    }

    /// Forward engine output verbatim; only traced at debug level.
    pub fn relay(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::debug!("{}", message);
        self.sink.log(message);
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").finish_non_exhaustive()
    }
}
