use std::collections::HashMap;
use std::fmt;

use crate::queue::Payload;

use super::coroutine::BoxedCoroutine;

/// Handle for a parked continuation. `Copy + Send` so it can travel to the
/// background thread that will eventually resume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContinuationId(u64);

impl ContinuationId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContinuationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One-shot resumption point. Invoked on the scheduler thread with the payload
/// handed to the bridge; the returned coroutine runs as a fresh task.
pub trait Continuation {
    fn invoke(self: Box<Self>, payload: Option<Payload>) -> BoxedCoroutine;
}

impl<F> Continuation for F
where
    F: FnOnce(Option<Payload>) -> BoxedCoroutine,
{
    fn invoke(self: Box<Self>, payload: Option<Payload>) -> BoxedCoroutine {
        (*self)(payload)
    }
}

/// Parked continuations, owned by the scheduler thread.
pub(crate) struct ContinuationTable {
    parked: HashMap<ContinuationId, Box<dyn Continuation>>,
    next_id: u64,
}

impl ContinuationTable {
    pub(crate) fn new() -> Self {
        Self {
            parked: HashMap::new(),
            next_id: 1,
        }
    }

    pub(crate) fn register<F>(&mut self, continuation: F) -> ContinuationId
    where
        F: FnOnce(Option<Payload>) -> BoxedCoroutine + 'static,
    {
        let id = ContinuationId(self.next_id);
        self.next_id += 1;
        self.parked.insert(id, Box::new(continuation));
        id
    }

    /// Removes the continuation; a second take of the same id yields `None`.
    pub(crate) fn take(&mut self, id: ContinuationId) -> Option<Box<dyn Continuation>> {
        self.parked.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.parked.len()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let count = self.parked.len();
        self.parked.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::coroutine::once;

    #[test]
    fn continuations_are_one_shot() {
        let mut table = ContinuationTable::new();
        let first = table.register(|_payload| -> BoxedCoroutine { Box::new(once(|_| Ok(()))) });
        let second = table.register(|_payload| -> BoxedCoroutine { Box::new(once(|_| Ok(()))) });
        assert!(first < second);
        assert_eq!(table.len(), 2);

        assert!(table.take(first).is_some());
        assert!(table.take(first).is_none());
        assert_eq!(table.clear(), 1);
        assert!(table.take(second).is_none());
    }
}
