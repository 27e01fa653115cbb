use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use serde_json::json;

use crate::error::ScriptError;
use crate::logging::{LogLevel, json_kv, json_str};
use crate::queue::Payload;
use crate::runtime::EventHub;
use crate::runtime::audit::{AuditEventBuilder, AuditStage};

use super::context::{ScriptContext, Spawn, TaskIds};
use super::continuation::{ContinuationId, ContinuationTable};
use super::coroutine::{BoxedCoroutine, TaskStep};
use super::{Task, TaskHandle, TaskId, TaskOrigin, TaskState};

const TARGET: &str = "overlay::tasks";

/// Owns the pending set and drives task bodies one step at a time.
///
/// Lives on the scheduler thread. Nothing here is shared with producers; they
/// only ever reach the [`EventHub`].
pub struct TaskRuntime {
    hub: EventHub,
    pending: VecDeque<Task>,
    continuations: ContinuationTable,
    ids: TaskIds,
}

impl TaskRuntime {
    pub fn new(hub: EventHub) -> Self {
        Self {
            hub,
            pending: VecDeque::new(),
            continuations: ContinuationTable::new(),
            ids: TaskIds::new(),
        }
    }

    /// Start a task and run it to its first suspension or completion.
    ///
    /// Suspended tasks join the tail of the pending set. Finished or failed
    /// tasks are reported and dropped here; starting a task never fails.
    pub fn spawn(&mut self, origin: TaskOrigin, body: BoxedCoroutine) -> TaskHandle {
        let id = self.ids.next();
        let label = origin.label();
        self.start(Task::new(id, origin, label, body))
    }

    /// One resumption pass over the tasks pending when the pass began.
    ///
    /// Each of those tasks is resumed exactly once, oldest first. Tasks that
    /// suspend again, and children started during the pass, go to the tail and
    /// wait for the next pass. Returns whether anything is still pending.
    pub fn resume_all(&mut self) -> bool {
        let batch = self.pending.len();
        for _ in 0..batch {
            let Some(task) = self.pending.pop_front() else {
                break;
            };
            self.run(task);
        }

        self.hub.record(|metrics| metrics.record_resume_pass());
        self.hub.audit(
            AuditEventBuilder::new(AuditStage::ResumePass)
                .detail("resumed", json!(batch))
                .detail("pending", json!(self.pending.len()))
                .finish(),
        );
        !self.pending.is_empty()
    }

    /// Resume until no task is pending. Returns the number of passes taken.
    ///
    /// Has no pass or time limit: a task that yields forever keeps this looping.
    pub fn resume_until_idle(&mut self) -> usize {
        let mut passes = 0;
        while !self.pending.is_empty() {
            self.resume_all();
            passes += 1;
        }
        passes
    }

    /// Run a parked continuation as a new task. Unknown or already used ids
    /// are logged and ignored.
    pub fn invoke_continuation(
        &mut self,
        id: ContinuationId,
        payload: Option<Payload>,
    ) -> Option<TaskHandle> {
        let Some(continuation) = self.continuations.take(id) else {
            self.hub.log(
                LogLevel::Warn,
                TARGET,
                "unknown_continuation",
                [json_kv("continuation", id.get())],
            );
            return None;
        };
        let body = continuation.invoke(payload);
        Some(self.spawn(TaskOrigin::Continuation(id), body))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Ids of pending tasks in resumption order.
    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.pending.iter().map(Task::id).collect()
    }

    pub fn parked_continuations(&self) -> usize {
        self.continuations.len()
    }

    /// Forget every parked continuation. Returns how many were dropped.
    pub fn clear_continuations(&mut self) -> usize {
        self.continuations.clear()
    }

    fn start(&mut self, task: Task) -> TaskHandle {
        self.record_spawn(&task);
        self.run(task)
    }

    /// Step `task` once, then start the children it spawned, breadth first.
    fn run(&mut self, task: Task) -> TaskHandle {
        let mut spawned = Vec::new();
        let handle = self.step(task, &mut spawned);

        let mut queue: VecDeque<Spawn> = spawned.into();
        while let Some(child) = queue.pop_front() {
            let task = Task::new(child.id, child.origin, child.label, child.body);
            self.record_spawn(&task);
            let mut grandchildren = Vec::new();
            self.step(task, &mut grandchildren);
            queue.extend(grandchildren);
        }
        handle
    }

    fn step(&mut self, mut task: Task, spawned: &mut Vec<Spawn>) -> TaskHandle {
        let outcome = {
            let Task {
                id,
                origin,
                label,
                body,
                ..
            } = &mut task;
            let mut cx = ScriptContext::new(
                &self.hub,
                &mut self.continuations,
                spawned,
                &self.ids,
                *id,
                origin,
                label,
            );
            panic::catch_unwind(AssertUnwindSafe(|| body.resume(&mut cx)))
                .unwrap_or_else(|payload| Err(ScriptError::from_panic(payload)))
        };

        match outcome {
            Ok(TaskStep::Yield) => {
                task.state = TaskState::Suspended;
                self.hub
                    .audit(task_audit(AuditStage::TaskSuspended, &task).finish());
                let handle = task.handle();
                self.pending.push_back(task);
                handle
            }
            Ok(TaskStep::Complete) => {
                task.state = TaskState::Completed;
                self.hub.record(|metrics| metrics.record_completed());
                self.hub
                    .audit(task_audit(AuditStage::TaskCompleted, &task).finish());
                task.handle()
            }
            Err(err) => {
                task.state = TaskState::Failed;
                self.report_failure(&task, &err);
                task.handle()
            }
        }
    }

    fn record_spawn(&self, task: &Task) {
        self.hub.record(|metrics| metrics.record_spawn());
        self.hub
            .audit(task_audit(AuditStage::TaskSpawned, task).finish());
        self.hub.log(
            LogLevel::Trace,
            TARGET,
            "task_spawned",
            [json_kv("task", task.id.get()), json_str("event", &task.label)],
        );
    }

    fn report_failure(&self, task: &Task, err: &ScriptError) {
        self.hub.record(|metrics| metrics.record_failed());
        self.hub.audit(
            task_audit(AuditStage::TaskFailed, task)
                .detail("error", json!(err.to_string()))
                .finish(),
        );
        self.hub.log(
            LogLevel::Error,
            TARGET,
            "task_failed",
            [
                json_kv("task", task.id.get()),
                json_str("event", &task.label),
                json_str("error", err.to_string()),
            ],
        );
    }
}

fn task_audit(stage: AuditStage, task: &Task) -> AuditEventBuilder {
    AuditEventBuilder::new(stage)
        .detail("task", json!(task.id.get()))
        .detail("event", json!(task.label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::logging::{Logger, MemorySink};
    use crate::runtime::audit::RecordingAudit;
    use crate::task::{Sequence, from_fn, once, yield_times};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn runtime() -> TaskRuntime {
        TaskRuntime::new(EventHub::new(&SchedulerConfig::default()))
    }

    fn counting(counter: Rc<RefCell<Vec<&'static str>>>, tag: &'static str, yields: usize) -> BoxedCoroutine {
        let mut left = yields;
        Box::new(from_fn(move |_cx| {
            counter.borrow_mut().push(tag);
            if left == 0 {
                Ok(TaskStep::Complete)
            } else {
                left -= 1;
                Ok(TaskStep::Yield)
            }
        }))
    }

    #[test]
    fn spawn_runs_to_first_suspension() {
        let mut runtime = runtime();
        let handle = runtime.spawn(TaskOrigin::Host, Box::new(yield_times(1, |_| Ok(()))));
        assert_eq!(handle.state, TaskState::Suspended);
        assert_eq!(runtime.pending_count(), 1);

        let done = runtime.spawn(TaskOrigin::Host, Box::new(once(|_| Ok(()))));
        assert_eq!(done.state, TaskState::Completed);
        assert_eq!(runtime.pending_count(), 1);
    }

    #[test]
    fn each_pending_task_resumes_at_most_once_per_pass() {
        let mut runtime = runtime();
        let trace = Rc::new(RefCell::new(Vec::new()));
        runtime.spawn(TaskOrigin::Host, counting(trace.clone(), "a", 3));
        runtime.spawn(TaskOrigin::Host, counting(trace.clone(), "b", 3));
        trace.borrow_mut().clear();

        assert!(runtime.resume_all());
        assert_eq!(*trace.borrow(), vec!["a", "b"]);

        assert!(runtime.resume_all());
        assert_eq!(*trace.borrow(), vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn children_start_after_parent_step_and_wait_for_next_pass() {
        let mut runtime = runtime();
        let trace = Rc::new(RefCell::new(Vec::new()));
        let parent_trace = trace.clone();
        let child_trace = trace.clone();
        let mut spawned = false;
        runtime.spawn(
            TaskOrigin::Host,
            Box::new(from_fn(move |cx| {
                if !spawned {
                    spawned = true;
                    return Ok(TaskStep::Yield);
                }
                cx.spawn(counting(child_trace.clone(), "child", 1));
                parent_trace.borrow_mut().push("parent");
                Ok(TaskStep::Complete)
            })),
        );

        assert!(runtime.resume_all());
        assert_eq!(*trace.borrow(), vec!["parent", "child"]);
        assert_eq!(runtime.pending_count(), 1);

        assert!(!runtime.resume_all());
        assert_eq!(*trace.borrow(), vec!["parent", "child", "child"]);
    }

    #[test]
    fn failures_abort_only_the_failing_task() {
        let sink = MemorySink::new();
        let audit = Arc::new(RecordingAudit::new());
        let config = SchedulerConfig::default()
            .with_logger(Logger::new(sink.clone()))
            .with_audit(audit.clone());
        let mut runtime = TaskRuntime::new(EventHub::new(&config));

        let raised = runtime.spawn(
            TaskOrigin::Event {
                name: "tick".to_string(),
                subscription: crate::registry::SubscriptionId::new(1),
            },
            Box::new(once(|_| Err(ScriptError::raised("bad tick")))),
        );
        assert_eq!(raised.state, TaskState::Failed);

        let panicked = runtime.spawn(
            TaskOrigin::Host,
            Box::new(Sequence::new().then(|_| Ok(())).then(|_| panic!("boom"))),
        );
        assert_eq!(panicked.state, TaskState::Suspended);
        runtime.spawn(TaskOrigin::Host, Box::new(yield_times(2, |_| Ok(()))));

        assert!(runtime.resume_all());
        assert_eq!(runtime.pending_count(), 1);
        assert_eq!(runtime.resume_until_idle(), 1);

        let failures: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|event| event.message == "task_failed")
            .collect();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].level, LogLevel::Error);
        assert_eq!(failures[0].field("event"), Some(&json!("tick")));
        assert_eq!(failures[0].field("error"), Some(&json!("bad tick")));
        assert_eq!(failures[1].field("error"), Some(&json!("task panicked: boom")));
        assert_eq!(audit.count(AuditStage::TaskFailed), 2);
    }

    #[test]
    fn continuations_run_once_and_unknown_ids_are_ignored() {
        let mut runtime = runtime();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let slot = Rc::new(RefCell::new(None));

        let register_seen = seen.clone();
        let register_slot = slot.clone();
        runtime.spawn(
            TaskOrigin::Host,
            Box::new(once(move |cx| {
                let id = cx.register_continuation(move |payload| -> BoxedCoroutine {
                    Box::new(once(move |_| {
                        register_seen.borrow_mut().push(payload);
                        Ok(())
                    }))
                });
                *register_slot.borrow_mut() = Some(id);
                Ok(())
            })),
        );

        let id = slot.borrow_mut().take().unwrap();
        assert_eq!(runtime.parked_continuations(), 1);

        let handle = runtime
            .invoke_continuation(id, Some(Arc::new(json!({"status": 200}))))
            .unwrap();
        assert_eq!(handle.state, TaskState::Completed);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].as_deref(), Some(&json!({"status": 200})));

        assert!(runtime.invoke_continuation(id, None).is_none());
        assert_eq!(runtime.parked_continuations(), 0);
    }
}
