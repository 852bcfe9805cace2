use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::event::RuntimeEvent;

/// Errors raised by sinks while handling an event.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink channel disconnected")]
    Disconnected,
    #[error("sink error: {0}")]
    Other(String),
}

/// A consumer of the live event feed.
///
/// Sinks run on dedicated workers spawned by the bus; a slow sink lags the
/// broadcast channel rather than blocking the runtime.
pub trait EventSink: Send {
    fn handle(&mut self, event: &RuntimeEvent) -> Result<(), SinkError>;
}

/// Writes a human-readable line per event to stdout.
#[derive(Debug, Default)]
pub struct StdOutSink;

impl EventSink for StdOutSink {
    fn handle(&mut self, event: &RuntimeEvent) -> Result<(), SinkError> {
        println!("{event}");
        Ok(())
    }
}

/// Captures events in memory; the handle survives the bus for inspection.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<RuntimeEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything captured so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RuntimeEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &RuntimeEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .map_err(|e| SinkError::Other(format!("lock poisoned: {e}")))?
            .push(event.clone());
        Ok(())
    }
}

/// Forwards events into a flume channel, e.g. toward an SSE handler.
pub struct ChannelSink {
    sender: flume::Sender<RuntimeEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(sender: flume::Sender<RuntimeEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &RuntimeEvent) -> Result<(), SinkError> {
        self.sender
            .send(event.clone())
            .map_err(|_| SinkError::Disconnected)
    }
}
