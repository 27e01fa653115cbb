use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Result, SchedulerError};

use super::handler::EventHandler;

/// Event-name cardinality is small and static; running out is a configuration defect.
pub const DEFAULT_HANDLER_TABLE_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub event_name: String,
    pub handler: Arc<dyn EventHandler>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_name", &self.event_name)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryState {
    // Keys survive after their last subscriber leaves; only the list is emptied.
    by_event: HashMap<String, Vec<Subscription>>,
    owners: HashMap<SubscriptionId, String>,
    next_id: u64,
}

/// Maps event names to their subscribers in insertion order.
pub struct HandlerRegistry {
    state: Mutex<RegistryState>,
    capacity: usize,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HANDLER_TABLE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                next_id: 1,
                ..RegistryState::default()
            }),
            capacity,
        }
    }

    pub fn add<H>(&self, event_name: &str, handler: H) -> Result<SubscriptionId>
    where
        H: EventHandler + 'static,
    {
        self.add_shared(event_name, Arc::new(handler))
    }

    pub fn add_shared(
        &self,
        event_name: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        validate_event_name(event_name)?;

        let mut state = self.lock();
        if !state.by_event.contains_key(event_name) && state.by_event.len() >= self.capacity {
            return Err(SchedulerError::HandlerTableFull {
                capacity: self.capacity,
            });
        }

        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.owners.insert(id, event_name.to_string());
        state
            .by_event
            .entry(event_name.to_string())
            .or_default()
            .push(Subscription {
                id,
                event_name: event_name.to_string(),
                handler,
            });
        Ok(id)
    }

    /// Returns false when the id is not subscribed to anything.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut state = self.lock();
            let Some(event_name) = state.owners.remove(&id) else {
                return false;
            };
            take_subscription(&mut state, &event_name, id)
        };
        // the handler may own script state; release it outside the lock
        drop(removed);
        true
    }

    /// Removal keyed by event name, reporting unknown names and ids as errors.
    pub fn remove_for(&self, event_name: &str, id: SubscriptionId) -> Result<()> {
        let removed = {
            let mut state = self.lock();
            if !state.by_event.contains_key(event_name) {
                return Err(SchedulerError::UnknownEvent(event_name.to_string()));
            }
            if state.owners.get(&id).map(String::as_str) != Some(event_name) {
                return Err(SchedulerError::UnknownSubscription {
                    event: event_name.to_string(),
                    id: id.get(),
                });
            }
            state.owners.remove(&id);
            take_subscription(&mut state, event_name, id)
        };
        drop(removed);
        Ok(())
    }

    /// Snapshot of the current subscribers, safe to iterate while handlers add or remove.
    pub fn handlers_for(&self, event_name: &str) -> Vec<Subscription> {
        self.lock()
            .by_event
            .get(event_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.lock().owners.contains_key(&id)
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.lock().owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of event names that have ever been subscribed to.
    pub fn event_count(&self) -> usize {
        self.lock().by_event.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every subscription. Used at teardown.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.lock();
            state.owners.clear();
            std::mem::take(&mut state.by_event)
        };
        removed.values().map(Vec::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn take_subscription(
    state: &mut RegistryState,
    event_name: &str,
    id: SubscriptionId,
) -> Option<Subscription> {
    let list = state.by_event.get_mut(event_name)?;
    let index = list.iter().position(|sub| sub.id == id)?;
    Some(list.remove(index))
}

pub(crate) fn validate_event_name(event_name: &str) -> Result<()> {
    if event_name.trim().is_empty() {
        return Err(SchedulerError::InvalidEventName(event_name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::handler_fn;

    fn noop() -> impl EventHandler + 'static {
        handler_fn(|_cx, _event| Ok(()))
    }

    #[test]
    fn ids_increase_and_order_is_insertion_order() {
        let registry = HandlerRegistry::new();
        let a = registry.add("tick", noop()).unwrap();
        let b = registry.add("tick", noop()).unwrap();
        let c = registry.add("tick", noop()).unwrap();
        assert!(a < b && b < c);

        let ids: Vec<_> = registry.handlers_for("tick").iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn removal_is_idempotent() {
        let registry = HandlerRegistry::new();
        let id = registry.add("tick", noop()).unwrap();
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.handlers_for("tick").is_empty());
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let registry = HandlerRegistry::new();
        let first = registry.add("tick", noop()).unwrap();
        registry.remove(first);
        let second = registry.add("tick", noop()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn remove_for_reports_unknown_names_and_ids() {
        let registry = HandlerRegistry::new();
        let id = registry.add("tick", noop()).unwrap();

        let err = registry.remove_for("tock", id).unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownEvent(name) if name == "tock"));

        registry.remove_for("tick", id).unwrap();
        let err = registry.remove_for("tick", id).unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownSubscription { .. }));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_removal() {
        let registry = HandlerRegistry::new();
        let a = registry.add("tick", noop()).unwrap();
        let b = registry.add("tick", noop()).unwrap();
        let snapshot = registry.handlers_for("tick");
        registry.remove(b);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            registry.handlers_for("tick").iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![a]
        );
    }

    #[test]
    fn full_table_is_a_fatal_configuration_error() {
        let registry = HandlerRegistry::with_capacity(2);
        registry.add("a", noop()).unwrap();
        registry.add("b", noop()).unwrap();
        registry.add("a", noop()).unwrap();
        let err = registry.add("c", noop()).unwrap_err();
        assert!(matches!(err, SchedulerError::HandlerTableFull { capacity: 2 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn blank_event_names_are_rejected() {
        let registry = HandlerRegistry::new();
        let err = registry.add("  ", noop()).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidEventName(_)));
    }
}
