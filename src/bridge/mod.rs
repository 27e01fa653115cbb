//! Completion bridge.
//!
//! The only way background threads hand results to scripts. Every path ends in
//! a locked list that the scheduler thread drains; nothing here calls into
//! script code.

use std::fmt::Display;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde_json::{Value, json};

use crate::logging::{LogLevel, json_kv, json_str};
use crate::queue::Enqueued;
use crate::runtime::EventHub;
use crate::task::{BoxedCoroutine, ContinuationId};

/// Work handed over through the completions mailbox.
pub(crate) enum Completion {
    Resume {
        id: ContinuationId,
        payload: Option<crate::queue::Payload>,
    },
    Callback(Box<dyn FnOnce() -> BoxedCoroutine + Send>),
}

/// Cloneable, `Send + Sync` handle for producer threads.
#[derive(Clone)]
pub struct CompletionBridge {
    hub: EventHub,
}

impl CompletionBridge {
    pub(crate) fn new(hub: EventHub) -> Self {
        Self { hub }
    }

    /// Deliver a result as an ordinary named event.
    pub fn complete(&self, event_name: &str, payload: Option<Value>) -> Enqueued {
        self.hub.queue_event(event_name, payload)
    }

    /// Resume a parked continuation on the next drain. Dropped after shutdown.
    pub fn resume(&self, id: ContinuationId, payload: Option<Value>) -> Enqueued {
        let outcome = self.hub.push_completion(Completion::Resume {
            id,
            payload: payload.map(Arc::new),
        });
        self.log_refused("resume", outcome);
        outcome
    }

    /// Run `callback` on the scheduler thread at the next drain. The coroutine
    /// it returns becomes a new task.
    pub fn post<F>(&self, callback: F) -> Enqueued
    where
        F: FnOnce() -> BoxedCoroutine + Send + 'static,
    {
        let outcome = self.hub.push_completion(Completion::Callback(Box::new(callback)));
        self.log_refused("post", outcome);
        outcome
    }

    /// Run `job` on a worker thread and deliver `{"ok": value}` or
    /// `{"error": message}` as `event_name`.
    pub fn spawn_job<F, E>(&self, event_name: &str, job: F) -> std::io::Result<JoinHandle<Enqueued>>
    where
        F: FnOnce() -> std::result::Result<Value, E> + Send + 'static,
        E: Display,
    {
        let bridge = self.clone();
        let event_name = event_name.to_string();
        thread::Builder::new()
            .name(format!("overlay-job:{event_name}"))
            .spawn(move || {
                let payload = match job() {
                    Ok(value) => json!({ "ok": value }),
                    Err(err) => {
                        bridge.hub.log(
                            LogLevel::Debug,
                            "overlay::bridge",
                            "job_failed",
                            [json_str("event", &event_name), json_str("error", err.to_string())],
                        );
                        json!({ "error": err.to_string() })
                    }
                };
                bridge.complete(&event_name, Some(payload))
            })
    }

    pub fn is_closed(&self) -> bool {
        self.hub.is_closed()
    }

    fn log_refused(&self, kind: &str, outcome: Enqueued) {
        if !outcome.is_queued() {
            self.hub.log(
                LogLevel::Debug,
                "overlay::bridge",
                "completion_dropped",
                [json_str("kind", kind), json_kv("closed", self.is_closed())],
            );
        }
    }
}
