use crate::logging::{LogEvent, LogFields, LogLevel};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct SchedulerMetrics {
    events_queued: u64,
    events_dropped: u64,
    events_dispatched: u64,
    completions: u64,
    tasks_spawned: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    resume_passes: u64,
    frames_presented: u64,
    hidden_iterations: u64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_queued(&mut self) {
        self.events_queued = self.events_queued.saturating_add(1);
    }

    pub fn record_dropped(&mut self) {
        self.events_dropped = self.events_dropped.saturating_add(1);
    }

    pub fn record_dispatch(&mut self) {
        self.events_dispatched = self.events_dispatched.saturating_add(1);
    }

    pub fn record_completion(&mut self) {
        self.completions = self.completions.saturating_add(1);
    }

    pub fn record_spawn(&mut self) {
        self.tasks_spawned = self.tasks_spawned.saturating_add(1);
    }

    pub fn record_completed(&mut self) {
        self.tasks_completed = self.tasks_completed.saturating_add(1);
    }

    pub fn record_failed(&mut self) {
        self.tasks_failed = self.tasks_failed.saturating_add(1);
    }

    pub fn record_resume_pass(&mut self) {
        self.resume_passes = self.resume_passes.saturating_add(1);
    }

    pub fn record_frame(&mut self, visible: bool) {
        if visible {
            self.frames_presented = self.frames_presented.saturating_add(1);
        } else {
            self.hidden_iterations = self.hidden_iterations.saturating_add(1);
        }
    }

    pub fn snapshot(&self, uptime: Duration) -> MetricSnapshot {
        MetricSnapshot {
            uptime_ms: uptime.as_millis() as u64,
            events_queued: self.events_queued,
            events_dropped: self.events_dropped,
            events_dispatched: self.events_dispatched,
            completions: self.completions,
            tasks_spawned: self.tasks_spawned,
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
            resume_passes: self.resume_passes,
            frames_presented: self.frames_presented,
            hidden_iterations: self.hidden_iterations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub uptime_ms: u64,
    pub events_queued: u64,
    pub events_dropped: u64,
    pub events_dispatched: u64,
    pub completions: u64,
    pub tasks_spawned: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub resume_passes: u64,
    pub frames_presented: u64,
    pub hidden_iterations: u64,
}

impl MetricSnapshot {
    pub fn to_log_event(&self, target: &str) -> LogEvent {
        LogEvent::with_fields(
            LogLevel::Info,
            target.to_string(),
            "scheduler_metrics".to_string(),
            self.as_fields(),
        )
    }

    pub fn as_fields(&self) -> LogFields {
        let mut map = LogFields::new();
        map.insert("uptime_ms".to_string(), json!(self.uptime_ms));
        map.insert("events_queued".to_string(), json!(self.events_queued));
        map.insert("events_dropped".to_string(), json!(self.events_dropped));
        map.insert("events_dispatched".to_string(), json!(self.events_dispatched));
        map.insert("completions".to_string(), json!(self.completions));
        map.insert("tasks_spawned".to_string(), json!(self.tasks_spawned));
        map.insert("tasks_completed".to_string(), json!(self.tasks_completed));
        map.insert("tasks_failed".to_string(), json!(self.tasks_failed));
        map.insert("resume_passes".to_string(), json!(self.resume_passes));
        map.insert("frames_presented".to_string(), json!(self.frames_presented));
        map.insert("hidden_iterations".to_string(), json!(self.hidden_iterations));
        map
    }
}
