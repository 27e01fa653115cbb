//! Cooperative task runtime.
//!
//! Every subscriber invocation, resumed continuation, posted callback and
//! script-spawned child becomes a [`Task`] wrapping a [`Coroutine`]. Tasks run
//! on the scheduler thread only; the runtime owns every suspended task in a
//! single FIFO pending set.

use std::fmt;

mod context;
mod continuation;
mod coroutine;
mod runtime;

pub use context::ScriptContext;
pub use continuation::{Continuation, ContinuationId};
pub use coroutine::{
    BoxedCoroutine, Coroutine, FromFn, Once, Sequence, TaskResult, TaskStep, YieldTimes,
    from_fn, once, yield_times,
};
pub use runtime::TaskRuntime;

use crate::registry::SubscriptionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a task exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOrigin {
    /// A subscriber invoked for a dispatched event.
    Event {
        name: String,
        subscription: SubscriptionId,
    },
    /// A parked continuation resumed through the bridge.
    Continuation(ContinuationId),
    /// A native callback posted through the bridge.
    Callback,
    /// Started by another task.
    Spawned { parent: TaskId },
    /// Started directly by the host through `Scheduler::spawn`.
    Host,
}

impl TaskOrigin {
    /// Label used in logs for tasks that do not inherit one from a parent.
    pub fn label(&self) -> String {
        match self {
            TaskOrigin::Event { name, .. } => name.clone(),
            TaskOrigin::Continuation(id) => format!("continuation:{id}"),
            TaskOrigin::Callback => "callback".to_string(),
            TaskOrigin::Spawned { parent } => format!("task:{parent}"),
            TaskOrigin::Host => "host".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Suspended,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Outcome of starting a task: its id and the state it reached in its first step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: TaskId,
    pub state: TaskState,
}

/// A live unit of script work. Owned by exactly one place, the runtime's pending set.
pub struct Task {
    id: TaskId,
    origin: TaskOrigin,
    label: String,
    state: TaskState,
    body: BoxedCoroutine,
}

impl Task {
    pub(crate) fn new(id: TaskId, origin: TaskOrigin, label: String, body: BoxedCoroutine) -> Self {
        Self {
            id,
            origin,
            label,
            state: TaskState::Ready,
            body,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn origin(&self) -> &TaskOrigin {
        &self.origin
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id,
            state: self.state,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
