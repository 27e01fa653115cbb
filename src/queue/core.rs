use std::sync::Arc;

use serde_json::Value;

use super::mailbox::{Enqueued, Mailbox};

/// Structured event data shared between every subscriber of one event.
pub type Payload = Arc<Value>;

/// A named event waiting for (or undergoing) dispatch.
#[derive(Debug, Clone)]
pub struct Event {
    name: String,
    payload: Option<Payload>,
    seq: u64,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Option<Payload>, seq: u64) -> Self {
        Self {
            name: name.into(),
            payload,
            seq,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_deref()
    }

    /// Shared handle to the payload, for tasks that keep it across suspensions.
    pub fn payload_handle(&self) -> Option<Payload> {
        self.payload.clone()
    }

    /// Position in the queue's enqueue order.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Pending named events, producible from any thread and drained by the scheduler.
pub struct EventQueue {
    mailbox: Mailbox<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            mailbox: Mailbox::new(capacity),
        }
    }

    pub fn enqueue(&self, name: impl Into<String>, payload: Option<Value>) -> Enqueued {
        self.enqueue_shared(name, payload.map(Arc::new))
    }

    pub fn enqueue_shared(&self, name: impl Into<String>, payload: Option<Payload>) -> Enqueued {
        let name = name.into();
        self.mailbox
            .push_with(move |seq| Event::new(name, payload, seq))
    }

    /// Enqueue past the capacity limit. Used for the scheduler's own lifecycle events.
    pub(crate) fn enqueue_reserved(&self, name: impl Into<String>) -> Enqueued {
        let name = name.into();
        self.mailbox.push_reserved(move |seq| Event::new(name, None, seq))
    }

    /// Swap out everything queued so far. Events enqueued afterwards belong to the next drain.
    pub fn drain(&self) -> Vec<Event> {
        self.mailbox.take()
    }

    /// Stop accepting events. Returns the events still queued at the moment of closing.
    pub fn close(&self) -> Vec<Event> {
        self.mailbox.close()
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub fn len(&self) -> usize {
        self.mailbox.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DropReason;
    use serde_json::json;
    use std::thread;

    #[test]
    fn drain_preserves_enqueue_order() {
        let queue = EventQueue::new();
        queue.enqueue("a", None);
        queue.enqueue("b", Some(json!({"n": 2})));
        queue.enqueue("c", None);

        let events = queue.drain();
        let names: Vec<_> = events.iter().map(Event::name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(events[1].payload(), Some(&json!({"n": 2})));
        assert!(events.windows(2).all(|pair| pair[0].seq() < pair[1].seq()));
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_after_close_drops_payload() {
        let queue = EventQueue::new();
        queue.close();
        let payload = Arc::new(json!({"big": true}));
        let outcome = queue.enqueue_shared("late", Some(payload.clone()));
        assert_eq!(outcome, Enqueued::Dropped(DropReason::Closed));
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn producers_on_other_threads_feed_one_drain() {
        let queue = Arc::new(EventQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for n in 0..25 {
                        queue.enqueue("work", Some(json!({"worker": worker, "n": n})));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.drain().len(), 100);
    }
}
