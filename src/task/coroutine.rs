use std::collections::VecDeque;

use crate::error::ScriptError;

use super::context::ScriptContext;

/// What a task did with the control it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    /// Suspended at a yield point; resume on a later pass.
    Yield,
    /// Finished normally.
    Complete,
}

pub type TaskResult = std::result::Result<TaskStep, ScriptError>;

/// Suspendable body of script work driven by the task runtime.
///
/// Each call to `resume` runs until the next yield point and returns. Scheduling
/// is cooperative: a body that never returns from `resume` stalls the frame and
/// everything behind it. There is no preemption.
pub trait Coroutine {
    fn resume(&mut self, cx: &mut ScriptContext<'_>) -> TaskResult;
}

impl<C> Coroutine for Box<C>
where
    C: Coroutine + ?Sized,
{
    fn resume(&mut self, cx: &mut ScriptContext<'_>) -> TaskResult {
        (**self).resume(cx)
    }
}

pub type BoxedCoroutine = Box<dyn Coroutine>;

/// Coroutine driven by a closure that is called on every resume.
pub struct FromFn<F> {
    body: F,
}

impl<F> Coroutine for FromFn<F>
where
    F: FnMut(&mut ScriptContext<'_>) -> TaskResult,
{
    fn resume(&mut self, cx: &mut ScriptContext<'_>) -> TaskResult {
        (self.body)(cx)
    }
}

pub fn from_fn<F>(body: F) -> FromFn<F>
where
    F: FnMut(&mut ScriptContext<'_>) -> TaskResult,
{
    FromFn { body }
}

/// Runs a closure once and completes without suspending.
pub struct Once<F> {
    body: Option<F>,
}

impl<F> Coroutine for Once<F>
where
    F: FnOnce(&mut ScriptContext<'_>) -> std::result::Result<(), ScriptError>,
{
    fn resume(&mut self, cx: &mut ScriptContext<'_>) -> TaskResult {
        match self.body.take() {
            Some(body) => body(cx).map(|()| TaskStep::Complete),
            None => Ok(TaskStep::Complete),
        }
    }
}

pub fn once<F>(body: F) -> Once<F>
where
    F: FnOnce(&mut ScriptContext<'_>) -> std::result::Result<(), ScriptError>,
{
    Once { body: Some(body) }
}

/// Suspends `times` times, then runs `then` and completes.
pub struct YieldTimes<F> {
    remaining: usize,
    then: Option<F>,
}

impl<F> Coroutine for YieldTimes<F>
where
    F: FnOnce(&mut ScriptContext<'_>) -> std::result::Result<(), ScriptError>,
{
    fn resume(&mut self, cx: &mut ScriptContext<'_>) -> TaskResult {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(TaskStep::Yield);
        }
        match self.then.take() {
            Some(then) => then(cx).map(|()| TaskStep::Complete),
            None => Ok(TaskStep::Complete),
        }
    }
}

pub fn yield_times<F>(times: usize, then: F) -> YieldTimes<F>
where
    F: FnOnce(&mut ScriptContext<'_>) -> std::result::Result<(), ScriptError>,
{
    YieldTimes {
        remaining: times,
        then: Some(then),
    }
}

type SequenceStep = Box<dyn FnOnce(&mut ScriptContext<'_>) -> std::result::Result<(), ScriptError>>;

/// Runs one step per resume, yielding between steps.
#[derive(Default)]
pub struct Sequence {
    steps: VecDeque<SequenceStep>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<F>(mut self, step: F) -> Self
    where
        F: FnOnce(&mut ScriptContext<'_>) -> std::result::Result<(), ScriptError> + 'static,
    {
        self.steps.push_back(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Coroutine for Sequence {
    fn resume(&mut self, cx: &mut ScriptContext<'_>) -> TaskResult {
        if let Some(step) = self.steps.pop_front() {
            step(cx)?;
        }
        if self.steps.is_empty() {
            Ok(TaskStep::Complete)
        } else {
            Ok(TaskStep::Yield)
        }
    }
}
