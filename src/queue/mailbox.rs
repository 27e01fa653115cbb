use std::sync::{Mutex, PoisonError};

/// Why an item was refused by a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The scheduler has shut down; nobody will drain the mailbox again.
    Closed,
    /// The configured capacity was reached.
    Full,
}

/// Outcome of a push into a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued { seq: u64 },
    Dropped(DropReason),
}

impl Enqueued {
    pub fn is_queued(&self) -> bool {
        matches!(self, Enqueued::Queued { .. })
    }
}

struct MailboxState<T> {
    items: Vec<T>,
    closed: bool,
    next_seq: u64,
}

/// Multi-producer list drained by a single consumer with a swap.
///
/// Items pushed while the consumer works through a drained batch land in the
/// fresh list and are only seen by the next `take`.
pub(crate) struct Mailbox<T> {
    state: Mutex<MailboxState<T>>,
    capacity: Option<usize>,
}

impl<T> Mailbox<T> {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(MailboxState {
                items: Vec::new(),
                closed: false,
                next_seq: 0,
            }),
            capacity,
        }
    }

    /// Push an item built from its sequence number. Refused items are dropped here,
    /// outside the lock.
    pub(crate) fn push_with(&self, build: impl FnOnce(u64) -> T) -> Enqueued {
        self.push_inner(build, true)
    }

    /// Push ignoring the capacity. Still refused once the mailbox is closed.
    pub(crate) fn push_reserved(&self, build: impl FnOnce(u64) -> T) -> Enqueued {
        self.push_inner(build, false)
    }

    fn push_inner(&self, build: impl FnOnce(u64) -> T, bounded: bool) -> Enqueued {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Enqueued::Dropped(DropReason::Closed);
        }
        if let Some(capacity) = self.capacity.filter(|_| bounded) {
            if state.items.len() >= capacity {
                return Enqueued::Dropped(DropReason::Full);
            }
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.items.push(build(seq));
        Enqueued::Queued { seq }
    }

    pub(crate) fn take(&self) -> Vec<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut state.items)
    }

    /// Refuse further pushes and hand back whatever was still queued.
    pub(crate) fn close(&self) -> Vec<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        std::mem::take(&mut state.items)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_swaps_out_current_items() {
        let mailbox = Mailbox::new(None);
        mailbox.push_with(|seq| seq);
        mailbox.push_with(|seq| seq);
        let batch = mailbox.take();
        mailbox.push_with(|seq| seq);
        assert_eq!(batch, vec![0, 1]);
        assert_eq!(mailbox.take(), vec![2]);
    }

    #[test]
    fn closed_mailbox_refuses_pushes() {
        let mailbox = Mailbox::new(None);
        mailbox.push_with(|_| "kept");
        let leftovers = mailbox.close();
        assert_eq!(leftovers, vec!["kept"]);
        assert_eq!(
            mailbox.push_with(|_| "late"),
            Enqueued::Dropped(DropReason::Closed)
        );
        assert!(mailbox.is_closed());
        assert_eq!(mailbox.len(), 0);
    }

    #[test]
    fn capacity_limits_pending_items() {
        let mailbox = Mailbox::new(Some(1));
        assert!(mailbox.push_with(|_| ()).is_queued());
        assert_eq!(
            mailbox.push_with(|_| ()),
            Enqueued::Dropped(DropReason::Full)
        );
        mailbox.take();
        assert!(mailbox.push_with(|_| ()).is_queued());
    }

    #[test]
    fn reserved_pushes_skip_capacity_but_not_close() {
        let mailbox = Mailbox::new(Some(1));
        assert!(mailbox.push_with(|seq| seq).is_queued());
        assert_eq!(mailbox.push_with(|seq| seq), Enqueued::Dropped(DropReason::Full));
        assert_eq!(mailbox.push_reserved(|seq| seq), Enqueued::Queued { seq: 1 });
        assert_eq!(mailbox.take(), vec![0, 1]);

        mailbox.close();
        assert_eq!(
            mailbox.push_reserved(|seq| seq),
            Enqueued::Dropped(DropReason::Closed)
        );
    }
}
