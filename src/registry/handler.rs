use std::sync::Arc;

use crate::error::ScriptError;
use crate::queue::Event;
use crate::task::{BoxedCoroutine, Coroutine, ScriptContext, once};

/// Subscriber callback. Each invocation produces the body of a fresh task.
///
/// Handlers are shared with whichever thread registers them, so they must be
/// `Send + Sync`; the task bodies they produce only ever run on the scheduler thread.
pub trait EventHandler: Send + Sync {
    fn invoke(&self, event: &Event) -> BoxedCoroutine;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> BoxedCoroutine + Send + Sync,
{
    fn invoke(&self, event: &Event) -> BoxedCoroutine {
        self(event)
    }
}

/// Handler that runs synchronously to completion.
pub struct FnHandler<F> {
    body: Arc<F>,
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&mut ScriptContext<'_>, &Event) -> Result<(), ScriptError> + Send + Sync + 'static,
{
    fn invoke(&self, event: &Event) -> BoxedCoroutine {
        let body = Arc::clone(&self.body);
        let event = event.clone();
        Box::new(once(move |cx| body(cx, &event)))
    }
}

pub fn handler_fn<F>(body: F) -> FnHandler<F>
where
    F: Fn(&mut ScriptContext<'_>, &Event) -> Result<(), ScriptError> + Send + Sync + 'static,
{
    FnHandler {
        body: Arc::new(body),
    }
}

/// Handler whose invocations may suspend.
pub struct CoroutineHandler<F> {
    factory: F,
}

impl<F, C> EventHandler for CoroutineHandler<F>
where
    F: Fn(&Event) -> C + Send + Sync,
    C: Coroutine + 'static,
{
    fn invoke(&self, event: &Event) -> BoxedCoroutine {
        Box::new((self.factory)(event))
    }
}

pub fn coroutine_handler<F, C>(factory: F) -> CoroutineHandler<F>
where
    F: Fn(&Event) -> C + Send + Sync,
    C: Coroutine + 'static,
{
    CoroutineHandler { factory }
}
