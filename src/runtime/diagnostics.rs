use std::sync::Arc;

use serde_json::json;

use crate::Result;
use crate::logging::{LogLevel, Logger, event_with_fields, json_kv};
use crate::queue::Event;
use crate::registry::{EventHandler, SubscriptionId};
use crate::task::{BoxedCoroutine, once};

use super::pollers::{FOCUS_HIDDEN_EVENT, FOCUS_SHOWN_EVENT};
use super::{EventHub, SHUTDOWN_EVENT, STARTUP_EVENT, UPDATE_EVENT};

/// Logs lifecycle events as they are dispatched, for observability/debugging.
///
/// Subscribes like any script would, so the lines show up in dispatch order.
#[derive(Clone)]
pub struct LifecycleLogger {
    logger: Logger,
    level: LogLevel,
    log_focus: bool,
    log_updates: bool,
    extra: Vec<String>,
}

impl LifecycleLogger {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            level: LogLevel::Debug,
            log_focus: true,
            log_updates: false,
            extra: Vec::new(),
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn log_focus(mut self, enabled: bool) -> Self {
        self.log_focus = enabled;
        self
    }

    /// `update` fires every frame; off by default.
    pub fn log_updates(mut self, enabled: bool) -> Self {
        self.log_updates = enabled;
        self
    }

    /// Also log an application event, e.g. a key event from the input pump.
    pub fn watch(mut self, event_name: impl Into<String>) -> Self {
        self.extra.push(event_name.into());
        self
    }

    fn event_names(&self) -> Vec<String> {
        let mut names = vec![STARTUP_EVENT.to_string(), SHUTDOWN_EVENT.to_string()];
        if self.log_focus {
            names.push(FOCUS_SHOWN_EVENT.to_string());
            names.push(FOCUS_HIDDEN_EVENT.to_string());
        }
        if self.log_updates {
            names.push(UPDATE_EVENT.to_string());
        }
        names.extend(self.extra.iter().cloned());
        names
    }

    /// Subscribe to every configured event. Returns the subscriptions in order.
    pub fn attach(self, hub: &EventHub) -> Result<Vec<SubscriptionId>> {
        let names = self.event_names();
        let shared = Arc::new(self);
        names
            .iter()
            .map(|name| hub.add_event_handler(name, LifecycleHandler(Arc::clone(&shared))))
            .collect()
    }

    fn emit(&self, event: &Event) {
        let mut fields = vec![json_kv("seq", event.seq())];
        if let Some(payload) = event.payload() {
            fields.push(json_kv("payload", payload.clone()));
        }
        let message = format!("event.{}", event.name());
        let log_event = event_with_fields(self.level, "overlay::lifecycle", &message, fields);
        let _ = self.logger.log_event(log_event);
    }
}

struct LifecycleHandler(Arc<LifecycleLogger>);

impl EventHandler for LifecycleHandler {
    fn invoke(&self, event: &Event) -> BoxedCoroutine {
        self.0.emit(event);
        Box::new(once(|_| Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::logging::MemorySink;
    use crate::runtime::Scheduler;

    #[test]
    fn lifecycle_events_are_logged_in_dispatch_order() {
        let sink = MemorySink::new();
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let ids = LifecycleLogger::new(Logger::new(sink.clone()))
            .with_level(LogLevel::Info)
            .watch("ctrl-a-down")
            .attach(scheduler.hub())
            .unwrap();
        assert_eq!(ids.len(), 5);

        scheduler.startup();
        scheduler.queue_event(FOCUS_SHOWN_EVENT, Some(json!({"visible": true})));
        scheduler.queue_event("ctrl-a-down", None);
        scheduler.queue_event(UPDATE_EVENT, None);
        scheduler.drain_and_dispatch();
        scheduler.shutdown();

        assert_eq!(
            sink.messages(),
            vec![
                "event.startup",
                "event.overlay-shown",
                "event.ctrl-a-down",
                "event.shutdown",
            ]
        );
        let shown = &sink.events()[1];
        assert_eq!(shown.level, LogLevel::Info);
        assert_eq!(shown.field("payload"), Some(&json!({"visible": true})));
    }
}
