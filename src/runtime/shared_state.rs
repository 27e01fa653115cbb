use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

/// Type-keyed map of collaborator services (settings, UI, telemetry readers)
/// that tasks call synchronously through their `ScriptContext`. Each type can
/// appear once. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T>(&self, value: T) -> Result<Arc<T>, SharedStateError>
    where
        T: Send + Sync + 'static,
    {
        let value = Arc::new(value);
        self.insert_arc(Arc::clone(&value))?;
        Ok(value)
    }

    pub fn insert_arc<T>(&self, value: Arc<T>) -> Result<(), SharedStateError>
    where
        T: Send + Sync + 'static,
    {
        let mut guard = self.inner.write().map_err(|_| SharedStateError::Poisoned)?;
        let type_id = TypeId::of::<T>();
        if guard.contains_key(&type_id) {
            return Err(SharedStateError::AlreadyExists);
        }
        guard.insert(type_id, Box::new(value));
        Ok(())
    }

    pub fn get<T>(&self) -> Result<Arc<T>, SharedStateError>
    where
        T: Send + Sync + 'static,
    {
        let guard = self.inner.read().map_err(|_| SharedStateError::Poisoned)?;
        let boxed = guard
            .get(&TypeId::of::<T>())
            .ok_or(SharedStateError::Missing)?;
        boxed
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or(SharedStateError::TypeMismatch)
    }

    pub fn get_or_insert_with<T, F>(&self, make: F) -> Result<Arc<T>, SharedStateError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut guard = self.inner.write().map_err(|_| SharedStateError::Poisoned)?;
        let boxed = guard
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Arc::new(make())));
        boxed
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or(SharedStateError::TypeMismatch)
    }

    /// Remove a service, returning it if it was present.
    pub fn remove<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let mut guard = self.inner.write().ok()?;
        let boxed = guard.remove(&TypeId::of::<T>())?;
        boxed.downcast::<Arc<T>>().ok().map(|arc| *arc)
    }

    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.inner
            .read()
            .map(|guard| guard.contains_key(&TypeId::of::<T>()))
            .unwrap_or(false)
    }
}

#[derive(Debug, Error)]
pub enum SharedStateError {
    #[error("service already registered")]
    AlreadyExists,
    #[error("service missing")]
    Missing,
    #[error("service type mismatch")]
    TypeMismatch,
    #[error("shared state poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct SettingsStore {
        frame_target_ms: Mutex<f64>,
    }

    #[test]
    fn insert_and_get() {
        let state = SharedState::new();
        state
            .insert(SettingsStore {
                frame_target_ms: Mutex::new(16.0),
            })
            .unwrap();
        let settings = state.get::<SettingsStore>().unwrap();
        assert_eq!(*settings.frame_target_ms.lock().unwrap(), 16.0);
    }

    #[test]
    fn duplicate_insert_fails() {
        let state = SharedState::new();
        state.insert(SettingsStore::default()).unwrap();
        let err = state.insert(SettingsStore::default()).unwrap_err();
        assert!(matches!(err, SharedStateError::AlreadyExists));
    }

    #[test]
    fn missing_service_is_reported() {
        let state = SharedState::new();
        let err = state.get::<SettingsStore>().unwrap_err();
        assert!(matches!(err, SharedStateError::Missing));
        assert!(!state.contains::<SettingsStore>());
    }

    #[test]
    fn lazy_init_is_shared_between_clones() {
        let state = SharedState::new();
        let clone = state.clone();
        let value = state
            .get_or_insert_with(SettingsStore::default)
            .unwrap();
        let second = clone.get::<SettingsStore>().unwrap();
        assert!(Arc::ptr_eq(&value, &second));
    }

    #[test]
    fn remove_returns_the_service() {
        let state = SharedState::new();
        state.insert(SettingsStore::default()).unwrap();
        assert!(state.remove::<SettingsStore>().is_some());
        assert!(state.remove::<SettingsStore>().is_none());
    }
}
