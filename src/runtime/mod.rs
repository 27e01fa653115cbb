use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Value, json};

use crate::bridge::{Completion, CompletionBridge};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::logging::{LogLevel, json_kv, json_str};
use crate::queue::{Enqueued, Event};
use crate::registry::{EventHandler, SubscriptionId, validate_event_name};
use crate::task::{Coroutine, TaskHandle, TaskOrigin, TaskRuntime};

use self::audit::{AuditEventBuilder, AuditStage};
use self::shared_state::SharedState;

pub mod audit;
mod backend;
mod clock;
pub mod diagnostics;
pub mod driver;
mod frame;
mod hub;
mod pollers;
pub mod shared_state;

pub use backend::{BackendCall, HeadlessBackend, RenderBackend};
pub use clock::{FrameClock, ManualClock, SystemClock};
pub use frame::{FrameLoop, FrameReport, ShutdownHandle, VisibilitySignal};
pub use hub::EventHub;
pub use pollers::{
    FOCUS_HIDDEN_EVENT, FOCUS_SHOWN_EVENT, FocusPoller, ForegroundProbe, PeriodicPoller,
};

/// Queued once before the first frame.
pub const STARTUP_EVENT: &str = "startup";
/// Queued once per visible frame, before drawing.
pub const UPDATE_EVENT: &str = "update";
/// Dispatched immediately during the present phase while a 3D scene is active.
pub const DRAW_3D_EVENT: &str = "draw-3d";
/// Queued once after the loop exits.
pub const SHUTDOWN_EVENT: &str = "shutdown";

const TARGET: &str = "overlay::scheduler";

/// What one drain pass delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub events: usize,
    pub completions: usize,
    pub tasks_started: usize,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.events == 0 && self.completions == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Events delivered in the final batch, `shutdown` included.
    pub final_events: usize,
    /// Events and completions still queued when the queue closed.
    pub dropped: usize,
    /// Passes needed to run every pending task to completion.
    pub resume_passes: usize,
    pub subscriptions_removed: usize,
    pub continuations_dropped: usize,
}

/// The scheduler-thread half: drains, dispatches and resumes.
///
/// Owned by the render thread. Producers get an [`EventHub`] or a
/// [`CompletionBridge`] instead; task bodies never leave this value.
pub struct Scheduler {
    hub: EventHub,
    tasks: TaskRuntime,
    config: SchedulerConfig,
    started: bool,
    shut_down: bool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let hub = EventHub::new(&config);
        Self {
            tasks: TaskRuntime::new(hub.clone()),
            hub,
            config,
            started: false,
            shut_down: false,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn bridge(&self) -> CompletionBridge {
        self.hub.bridge()
    }

    pub fn shared(&self) -> &SharedState {
        self.hub.shared()
    }

    pub fn tasks(&self) -> &TaskRuntime {
        &self.tasks
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

    pub fn queue_event(&self, event_name: &str, payload: Option<Value>) -> Enqueued {
        self.hub.queue_event(event_name, payload)
    }

    /// Dispatch an event right now, bypassing the queue. Returns the number of
    /// subscribers invoked. Immediate events have no queue position and carry seq 0.
    pub fn run_event(&mut self, event_name: &str, payload: Option<Value>) -> Result<usize> {
        validate_event_name(event_name)?;
        let event = Event::new(event_name, payload.map(Arc::new), 0);
        Ok(self.dispatch(&event))
    }

    /// Start a host-owned task and run it to its first suspension.
    pub fn spawn<C>(&mut self, body: C) -> TaskHandle
    where
        C: Coroutine + 'static,
    {
        self.tasks.spawn(TaskOrigin::Host, Box::new(body))
    }

    /// Queue `startup` and deliver it. Only the first call does anything.
    pub fn startup(&mut self) -> DrainReport {
        if self.started {
            return DrainReport::default();
        }
        self.started = true;
        self.hub.log(
            LogLevel::Info,
            TARGET,
            "scheduler_started",
            [json_kv("handlers", self.hub.registry().len())],
        );
        self.hub.audit(
            AuditEventBuilder::new(AuditStage::Started)
                .detail("handlers", json!(self.hub.registry().len()))
                .finish(),
        );
        self.hub.queue_lifecycle(STARTUP_EVENT);
        self.drain_and_dispatch()
    }

    /// One drain pass: queued events first, then bridge completions.
    ///
    /// Anything enqueued while this batch runs is left for the next pass.
    pub fn drain_and_dispatch(&mut self) -> DrainReport {
        let mut report = DrainReport::default();

        for event in self.hub.drain_events() {
            let started = self.dispatch(&event);
            report.events += 1;
            report.tasks_started += started;
        }

        for completion in self.hub.drain_completions() {
            report.completions += 1;
            if self.complete(completion) {
                report.tasks_started += 1;
            }
        }

        report
    }

    /// One resumption pass. Returns whether tasks remain pending.
    pub fn resume_all(&mut self) -> bool {
        self.tasks.resume_all()
    }

    /// Pump drain and resume until nothing is queued or pending. Returns the
    /// number of iterations. Parked continuations do not keep it running.
    pub fn run_until_idle(&mut self) -> usize {
        let mut iterations = 0;
        loop {
            let report = self.drain_and_dispatch();
            let pending = self.tasks.has_pending() && self.tasks.resume_all();
            iterations += 1;
            let quiet = self.hub.queued() == 0
                && self.hub.pending_completions() == 0
                && self.hub.pending_forwarded() == 0;
            if report.is_empty() && !pending && quiet {
                break;
            }
        }
        iterations
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending_count()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Deliver `shutdown`, close the queue, run every pending task to
    /// completion and tear down subscriptions and continuations.
    ///
    /// The resume phase has no pass or time limit. Later calls do nothing.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.shut_down {
            return ShutdownReport::default();
        }
        self.hub.audit(
            AuditEventBuilder::new(AuditStage::ShutdownStarted)
                .detail("pending", json!(self.tasks.pending_count()))
                .finish(),
        );
        self.hub.log(
            LogLevel::Info,
            TARGET,
            "shutdown_started",
            [json_kv("pending", self.tasks.pending_count())],
        );

        self.hub.queue_lifecycle(SHUTDOWN_EVENT);
        let final_batch = self.drain_and_dispatch();

        let dropped = self.hub.close();
        let resume_passes = self.tasks.resume_until_idle();
        let subscriptions_removed = self.hub.registry().clear();
        let continuations_dropped = self.tasks.clear_continuations();
        self.shut_down = true;

        let report = ShutdownReport {
            final_events: final_batch.events,
            dropped,
            resume_passes,
            subscriptions_removed,
            continuations_dropped,
        };
        self.hub.audit(
            AuditEventBuilder::new(AuditStage::Stopped)
                .detail("resume_passes", json!(resume_passes))
                .detail("dropped", json!(dropped))
                .finish(),
        );
        self.hub.log(
            LogLevel::Info,
            TARGET,
            "scheduler_stopped",
            [
                json_kv("resume_passes", resume_passes),
                json_kv("dropped", dropped),
                json_kv("subscriptions_removed", subscriptions_removed),
            ],
        );
        report
    }

    /// Spawn one task per current subscriber. Returns how many were invoked.
    fn dispatch(&mut self, event: &Event) -> usize {
        let subscribers = self.hub.registry().handlers_for(event.name());
        for subscription in &subscribers {
            let body = subscription.handler.invoke(event);
            self.tasks.spawn(
                TaskOrigin::Event {
                    name: event.name().to_string(),
                    subscription: subscription.id,
                },
                body,
            );
        }

        self.hub.record(|metrics| metrics.record_dispatch());
        self.hub.audit(
            AuditEventBuilder::new(AuditStage::EventDispatched)
                .detail("event", json!(event.name()))
                .detail("subscribers", json!(subscribers.len()))
                .finish(),
        );
        self.hub.log(
            LogLevel::Trace,
            TARGET,
            "event_dispatched",
            [
                json_str("event", event.name()),
                json_kv("subscribers", subscribers.len()),
            ],
        );
        subscribers.len()
    }

    /// Returns whether a task was started.
    fn complete(&mut self, completion: Completion) -> bool {
        match completion {
            Completion::Resume { id, payload } => {
                self.tasks.invoke_continuation(id, payload).is_some()
            }
            Completion::Callback(callback) => {
                match panic::catch_unwind(AssertUnwindSafe(callback)) {
                    Ok(body) => {
                        self.tasks.spawn(TaskOrigin::Callback, body);
                        true
                    }
                    Err(_) => {
                        self.hub.log(
                            LogLevel::Error,
                            "overlay::bridge",
                            "posted_callback_panicked",
                            std::iter::empty(),
                        );
                        false
                    }
                }
            }
        }
    }
}
