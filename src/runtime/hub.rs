use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::bridge::{Completion, CompletionBridge};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::logging::{
    EventQueueSink, LOG_MESSAGE_EVENT, LogLevel, Logger, event_with_fields, json_kv, json_str,
};
use crate::metrics::SchedulerMetrics;
use crate::queue::mailbox::Mailbox;
use crate::queue::{DropReason, Enqueued, Event, EventQueue, Payload};
use crate::registry::{EventHandler, HandlerRegistry, SubscriptionId};

use super::audit::{AuditEvent, SchedulerAudit};
use super::shared_state::SharedState;

struct HubInner {
    queue: EventQueue,
    completions: Mailbox<Completion>,
    registry: HandlerRegistry,
    shared: SharedState,
    logger: Option<Logger>,
    metrics: Option<Arc<Mutex<SchedulerMetrics>>>,
    audit: Arc<dyn SchedulerAudit>,
    forwarder: Option<EventQueueSink>,
    full_warned: AtomicBool,
}

/// Thread-safe face of a scheduler.
///
/// Cloned out to producers (workers, pollers, input pumps). Everything here
/// only touches locked lists and maps; no script code ever runs through a hub.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                queue: EventQueue::with_capacity(config.queue_capacity),
                completions: Mailbox::new(None),
                registry: HandlerRegistry::with_capacity(config.handler_table_capacity),
                shared: SharedState::new(),
                logger: config.logger.clone(),
                metrics: config.metrics_handle(),
                audit: Arc::clone(&config.audit),
                forwarder: config.log_forwarding.clone(),
                full_warned: AtomicBool::new(false),
            }),
        }
    }

    /// Append an event for the next drain pass. Callable from any thread.
    pub fn queue_event(&self, event_name: &str, payload: Option<Value>) -> Enqueued {
        self.queue_shared(event_name, payload.map(Arc::new))
    }

    pub fn queue_shared(&self, event_name: &str, payload: Option<Payload>) -> Enqueued {
        let outcome = self.inner.queue.enqueue_shared(event_name, payload);
        self.note_enqueue(event_name, outcome);
        outcome
    }

    pub fn add_event_handler<H>(&self, event_name: &str, handler: H) -> Result<SubscriptionId>
    where
        H: EventHandler + 'static,
    {
        let id = self.inner.registry.add(event_name, handler)?;
        self.log(
            LogLevel::Debug,
            "overlay::scheduler",
            "handler_added",
            [json_str("event", event_name), json_kv("subscription", id.get())],
        );
        Ok(id)
    }

    /// Remove a subscription. Errors when the name or id is unknown.
    pub fn remove_event_handler(&self, event_name: &str, id: SubscriptionId) -> Result<()> {
        self.inner.registry.remove_for(event_name, id)?;
        self.log(
            LogLevel::Debug,
            "overlay::scheduler",
            "handler_removed",
            [json_str("event", event_name), json_kv("subscription", id.get())],
        );
        Ok(())
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn shared(&self) -> &SharedState {
        &self.inner.shared
    }

    pub fn bridge(&self) -> CompletionBridge {
        CompletionBridge::new(self.clone())
    }

    pub fn logger(&self) -> Option<&Logger> {
        self.inner.logger.as_ref()
    }

    /// True once shutdown closed the queue.
    pub fn is_closed(&self) -> bool {
        self.inner.queue.is_closed()
    }

    /// Events waiting for the next drain.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Queue a lifecycle event (`startup`, `update`, `shutdown`). A bounded
    /// queue still accepts it.
    pub(crate) fn queue_lifecycle(&self, event_name: &str) -> Enqueued {
        let outcome = self.inner.queue.enqueue_reserved(event_name);
        self.note_enqueue(event_name, outcome);
        outcome
    }

    /// Log lines waiting in the forwarding sink for the next drain.
    pub(crate) fn pending_forwarded(&self) -> usize {
        self.inner
            .forwarder
            .as_ref()
            .map_or(0, |forwarder| forwarder.pending())
    }

    pub(crate) fn push_completion(&self, completion: Completion) -> Enqueued {
        let outcome = self.inner.completions.push_with(|_| completion);
        if outcome.is_queued() {
            self.record(|metrics| metrics.record_completion());
        }
        outcome
    }

    pub(crate) fn pending_completions(&self) -> usize {
        self.inner.completions.len()
    }

    /// Move forwarded log lines into the queue, then swap out the event batch.
    pub(crate) fn drain_events(&self) -> Vec<Event> {
        if let Some(forwarder) = self.inner.forwarder.as_ref() {
            for line in forwarder.take() {
                let outcome = self.inner.queue.enqueue(LOG_MESSAGE_EVENT, Some(line));
                self.note_enqueue(LOG_MESSAGE_EVENT, outcome);
            }
        }
        self.inner.full_warned.store(false, Ordering::Relaxed);
        self.inner.queue.drain()
    }

    pub(crate) fn drain_completions(&self) -> Vec<Completion> {
        self.inner.completions.take()
    }

    /// Refuse further events and completions. Returns how many were still queued.
    pub(crate) fn close(&self) -> usize {
        if let Some(forwarder) = self.inner.forwarder.as_ref() {
            forwarder.close();
        }
        let events = self.inner.queue.close();
        let completions = self.inner.completions.close();
        events.len() + completions.len()
    }

    pub(crate) fn log<I>(&self, level: LogLevel, target: &str, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        if let Some(logger) = self.inner.logger.as_ref() {
            if logger.enabled(level) {
                let event = event_with_fields(level, target, message, fields);
                let _ = logger.log_event(event);
            }
        }
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut SchedulerMetrics)) {
        if let Some(metrics) = self.inner.metrics.as_ref() {
            if let Ok(mut guard) = metrics.lock() {
                update(&mut guard);
            }
        }
    }

    pub(crate) fn audit(&self, event: AuditEvent) {
        self.inner.audit.record(event);
    }

    fn note_enqueue(&self, event_name: &str, outcome: Enqueued) {
        match outcome {
            Enqueued::Queued { .. } => self.record(|metrics| metrics.record_queued()),
            Enqueued::Dropped(reason) => {
                self.record(|metrics| metrics.record_dropped());
                if reason == DropReason::Full && !self.inner.full_warned.swap(true, Ordering::Relaxed)
                {
                    self.log(
                        LogLevel::Warn,
                        "overlay::scheduler",
                        "event_queue_full",
                        [json_str("event", event_name)],
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use serde_json::json;

    #[test]
    fn full_queue_drops_and_warns_once_per_drain() {
        let sink = MemorySink::new();
        let mut config = SchedulerConfig::default()
            .with_logger(Logger::new(sink.clone()))
            .with_queue_capacity(1);
        config.enable_metrics();
        let metrics = config.metrics_handle().unwrap();
        let hub = EventHub::new(&config);

        assert!(hub.queue_event("a", None).is_queued());
        assert_eq!(hub.queue_event("b", None), Enqueued::Dropped(DropReason::Full));
        assert_eq!(hub.queue_event("c", None), Enqueued::Dropped(DropReason::Full));

        let warnings = |sink: &MemorySink| {
            sink.messages()
                .iter()
                .filter(|message| *message == "event_queue_full")
                .count()
        };
        assert_eq!(warnings(&sink), 1);

        assert_eq!(hub.drain_events().len(), 1);
        hub.queue_event("d", None);
        hub.queue_event("e", None);
        assert_eq!(warnings(&sink), 2);

        let snapshot = metrics.lock().unwrap().snapshot(Default::default());
        assert_eq!(snapshot.events_queued, 2);
        assert_eq!(snapshot.events_dropped, 3);
    }

    #[test]
    fn forwarded_log_lines_arrive_as_events_on_drain() {
        let forward = EventQueueSink::new();
        let config = SchedulerConfig::default()
            .with_logger(Logger::new(forward.clone()))
            .with_log_forwarding(forward.clone());
        let hub = EventHub::new(&config);

        hub.log(LogLevel::Warn, "overlay::test", "disk almost full", std::iter::empty());
        hub.queue_event("tick", None);
        let names: Vec<_> = hub
            .drain_events()
            .iter()
            .map(|event| event.name().to_string())
            .collect();
        assert_eq!(names, vec!["tick".to_string(), LOG_MESSAGE_EVENT.to_string()]);

        hub.close();
        hub.log(LogLevel::Warn, "overlay::test", "late", std::iter::empty());
        assert_eq!(forward.pending(), 0);
        assert_eq!(hub.queue_event("tick", Some(json!(1))), Enqueued::Dropped(DropReason::Closed));
    }
}
