use std::cell::Cell;

use serde_json::Value;

use crate::bridge::CompletionBridge;
use crate::error::Result;
use crate::logging::{LogLevel, json_kv, json_str};
use crate::queue::{Enqueued, Payload};
use crate::registry::{EventHandler, SubscriptionId};
use crate::runtime::EventHub;
use crate::runtime::shared_state::SharedState;

use super::continuation::{ContinuationId, ContinuationTable};
use super::coroutine::{BoxedCoroutine, Coroutine};
use super::{TaskId, TaskOrigin};

/// A child task waiting to start once its parent's step returns.
pub(crate) struct Spawn {
    pub(crate) id: TaskId,
    pub(crate) origin: TaskOrigin,
    pub(crate) label: String,
    pub(crate) body: BoxedCoroutine,
}

/// Task id allocator shared between the runtime and running contexts.
#[derive(Debug)]
pub(crate) struct TaskIds {
    next: Cell<u64>,
}

impl TaskIds {
    pub(crate) fn new() -> Self {
        Self { next: Cell::new(1) }
    }

    pub(crate) fn next(&self) -> TaskId {
        let id = self.next.get();
        self.next.set(id + 1);
        TaskId::new(id)
    }
}

/// What a running task can reach: the event surface, continuations, child
/// tasks, shared services and the logger.
pub struct ScriptContext<'a> {
    hub: &'a EventHub,
    continuations: &'a mut ContinuationTable,
    spawned: &'a mut Vec<Spawn>,
    ids: &'a TaskIds,
    task: TaskId,
    origin: &'a TaskOrigin,
    label: &'a str,
}

impl<'a> ScriptContext<'a> {
    pub(crate) fn new(
        hub: &'a EventHub,
        continuations: &'a mut ContinuationTable,
        spawned: &'a mut Vec<Spawn>,
        ids: &'a TaskIds,
        task: TaskId,
        origin: &'a TaskOrigin,
        label: &'a str,
    ) -> Self {
        Self {
            hub,
            continuations,
            spawned,
            ids,
            task,
            origin,
            label,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task
    }

    pub fn origin(&self) -> &TaskOrigin {
        self.origin
    }

    /// Name of the event this task (or its root ancestor) was started for.
    pub fn event_name(&self) -> &str {
        self.label
    }

    /// Queue an event for the next drain pass. Never dispatched inside the current one.
    pub fn queue_event(&self, event_name: &str, payload: Option<Value>) -> Enqueued {
        self.hub.queue_event(event_name, payload)
    }

    pub fn queue_shared(&self, event_name: &str, payload: Option<Payload>) -> Enqueued {
        self.hub.queue_shared(event_name, payload)
    }

    pub fn add_event_handler<H>(&self, event_name: &str, handler: H) -> Result<SubscriptionId>
    where
        H: EventHandler + 'static,
    {
        self.hub.add_event_handler(event_name, handler)
    }

    pub fn remove_event_handler(&self, event_name: &str, id: SubscriptionId) -> Result<()> {
        self.hub.remove_event_handler(event_name, id)
    }

    /// Start a child task. It runs for the first time right after the current
    /// step returns, never nested inside it.
    pub fn spawn<C>(&mut self, body: C) -> TaskId
    where
        C: Coroutine + 'static,
    {
        let id = self.ids.next();
        self.spawned.push(Spawn {
            id,
            origin: TaskOrigin::Spawned { parent: self.task },
            label: self.label.to_string(),
            body: Box::new(body),
        });
        id
    }

    /// Park a one-shot continuation. A background thread resumes it through
    /// [`CompletionBridge::resume`]; it then runs as a new task on the next drain.
    pub fn register_continuation<F>(&mut self, continuation: F) -> ContinuationId
    where
        F: FnOnce(Option<Payload>) -> BoxedCoroutine + 'static,
    {
        self.continuations.register(continuation)
    }

    pub fn bridge(&self) -> CompletionBridge {
        self.hub.bridge()
    }

    pub fn shared(&self) -> &SharedState {
        self.hub.shared()
    }

    pub fn hub(&self) -> &EventHub {
        self.hub
    }

    /// Log on behalf of the script under the `overlay::tasks` target.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.hub.log(
            level,
            "overlay::tasks",
            message,
            [
                json_kv("task", self.task.get()),
                json_str("event", self.label),
            ],
        );
    }
}
