use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::{LogEvent, LogLevel, LogSink, LoggingResult};

/// Event name under which forwarded log lines reach script handlers.
pub const LOG_MESSAGE_EVENT: &str = "log-message";

/// Forwards log events to scripts as `log-message` events.
///
/// Lines are buffered here and moved into the event queue at the start of the
/// scheduler's next drain pass, so logging from inside a task never re-enters
/// dispatch. After shutdown the sink discards everything.
///
/// Only `Info` and above are forwarded by default; the scheduler traces every
/// dispatch at lower levels and forwarding those would keep the queue busy forever.
#[derive(Clone)]
pub struct EventQueueSink {
    pending: Arc<Mutex<VecDeque<Value>>>,
    closed: Arc<AtomicBool>,
    min_level: LogLevel,
}

impl Default for EventQueueSink {
    fn default() -> Self {
        Self {
            pending: Arc::default(),
            closed: Arc::default(),
            min_level: LogLevel::Info,
        }
    }
}

impl EventQueueSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub(crate) fn take(&self) -> Vec<Value> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl LogSink for EventQueueSink {
    fn log(&self, event: &LogEvent) -> LoggingResult<()> {
        if event.level < self.min_level || self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let value = serde_json::to_value(event)?;
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(value);
        Ok(())
    }
}
