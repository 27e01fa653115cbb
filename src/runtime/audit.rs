//! Scheduler lifecycle audit utilities.
//!
//! Hooks so callers can observe the scheduler's major transitions (dispatch,
//! task state changes, resumption passes, frames) without contorting the core
//! loop. Each record carries a stage identifier plus structured details.

use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use serde_json::Value;

/// Distinct checkpoints emitted by the scheduler and frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStage {
    /// The scheduler is about to deliver `startup`.
    Started,
    /// An event finished spawning tasks for all of its subscribers.
    EventDispatched,
    /// A task body ran for the first time.
    TaskSpawned,
    /// A task stopped at a yield point and is pending.
    TaskSuspended,
    /// A task finished normally.
    TaskCompleted,
    /// A task raised or panicked.
    TaskFailed,
    /// One pass over the pending set finished.
    ResumePass,
    /// The render backend presented a frame.
    FramePresented,
    /// Shutdown began; the final event batch is about to be delivered.
    ShutdownStarted,
    /// Teardown finished.
    Stopped,
}

/// Structured audit entry.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub timestamp: SystemTime,
    pub stage: AuditStage,
    pub details: Vec<(String, Value)>,
}

impl AuditEvent {
    fn new(stage: AuditStage) -> Self {
        Self {
            timestamp: SystemTime::now(),
            stage,
            details: Vec::new(),
        }
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }
}

/// Builder helper to append fields ergonomically.
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(stage: AuditStage) -> Self {
        Self {
            event: AuditEvent::new(stage),
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.event.details.push((key.into(), value));
        self
    }

    pub fn finish(self) -> AuditEvent {
        self.event
    }
}

/// Trait implemented by any audit sink.
pub trait SchedulerAudit: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default no-op implementation used when auditing is disabled.
#[derive(Debug, Default)]
pub struct NullAudit;

impl SchedulerAudit for NullAudit {
    fn record(&self, _event: AuditEvent) {}
}

/// Buffers every record in memory.
#[derive(Debug, Default)]
pub struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stages(&self) -> Vec<AuditStage> {
        self.events().into_iter().map(|event| event.stage).collect()
    }

    pub fn count(&self, stage: AuditStage) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.stage == stage)
            .count()
    }
}

impl SchedulerAudit for RecordingAudit {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
