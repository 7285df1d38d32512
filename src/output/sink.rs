use super::OutputError;
use crate::mapping::DigitalOutput;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Low-level event handed to the host input system
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Press(DigitalOutput),
    Release(DigitalOutput),
    Motion { dx: i32, dy: i32 },
}

pub trait OutputSink: Send {
    fn emit(&mut self, event: SinkEvent) -> Result<(), OutputError>;
}

/// Only logs what would be injected
#[derive(Debug, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn emit(&mut self, event: SinkEvent) -> Result<(), OutputError> {
        info!("Output: {:?}", event);
        Ok(())
    }
}

/// Keeps every event in a shared buffer
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns and clears the recorded events
    pub fn take(&self) -> Vec<SinkEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl OutputSink for RecordingSink {
    fn emit(&mut self, event: SinkEvent) -> Result<(), OutputError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}
