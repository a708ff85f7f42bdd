//! Reactive root state.
//!
//! State changes go through [`StateStore::merge`], which notifies listeners
//! synchronously after the lock is released. Work that completes later holds
//! a [`StateHandle`] and merges against whatever the state is at completion
//! time. After [`StateStore::unmount`] such merges are dropped.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::scope::StateMap;

type Listener = Arc<dyn Fn(&StateMap) + Send + Sync>;

struct Inner {
    state: Arc<StateMap>,
    version: u64,
    listeners: Vec<(u64, Listener)>,
    next_listener: u64,
    mounted: bool,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    // A listener that panicked leaves the state itself consistent
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn merge_into(inner: &Mutex<Inner>, patch: StateMap) -> bool {
    let (snapshot, listeners) = {
        let mut guard = lock(inner);
        if !guard.mounted {
            return false;
        }
        let mut next = (*guard.state).clone();
        next.extend(patch);
        guard.state = Arc::new(next);
        guard.version += 1;
        let listeners: Vec<Listener> = guard.listeners.iter().map(|(_, l)| l.clone()).collect();
        (guard.state.clone(), listeners)
    };

    for listener in listeners {
        listener(&snapshot);
    }
    true
}

/// Root state of one mounted document.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<Inner>>,
}

impl StateStore {
    pub fn new(initial: StateMap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: Arc::new(initial),
                version: 0,
                listeners: Vec::new(),
                next_listener: 0,
                mounted: true,
            })),
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> Arc<StateMap> {
        lock(&self.inner).state.clone()
    }

    /// Number of merges applied so far.
    pub fn version(&self) -> u64 {
        lock(&self.inner).version
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.inner).mounted
    }

    /// Shallow-merge `patch` into the state and notify listeners.
    ///
    /// Returns false when the store is unmounted and the patch was dropped.
    pub fn merge(&self, patch: StateMap) -> bool {
        merge_into(&self.inner, patch)
    }

    /// Register a listener called with the new state after every merge.
    /// Dropping the returned guard unsubscribes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateMap) + Send + Sync + 'static,
    {
        let mut guard = lock(&self.inner);
        let id = guard.next_listener;
        guard.next_listener += 1;
        guard.listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// A weak handle for merges that complete after the current pass.
    pub fn handle(&self) -> StateHandle {
        StateHandle {
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Tear down: drop all listeners and ignore later merges.
    pub fn unmount(&self) {
        let mut guard = lock(&self.inner);
        guard.mounted = false;
        guard.listeners.clear();
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = lock(&self.inner);
        f.debug_struct("StateStore")
            .field("version", &guard.version)
            .field("mounted", &guard.mounted)
            .field("listeners", &guard.listeners.len())
            .finish()
    }
}

/// Unsubscribes its listener when dropped.
pub struct Subscription {
    id: u64,
    store: Weak<Mutex<Inner>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            lock(&inner).listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Weak reference to a store for deferred merges.
#[derive(Clone)]
pub struct StateHandle {
    store: Weak<Mutex<Inner>>,
}

impl StateHandle {
    /// Merge into the store if it is still alive and mounted.
    pub fn merge(&self, patch: StateMap) -> bool {
        match self.store.upgrade() {
            Some(inner) => merge_into(&inner, patch),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn map(value: serde_json::Value) -> StateMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn merge_is_shallow_and_notifies() {
        let store = StateStore::new(map(json!({"a": 1, "b": {"x": 1}})));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = store.subscribe(move |state| sink.lock().unwrap().push(state.clone()));

        assert!(store.merge(map(json!({"b": {"y": 2}}))));

        assert_eq!(*store.snapshot(), map(json!({"a": 1, "b": {"y": 2}})));
        assert_eq!(store.version(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn dropping_subscription_stops_notifications() {
        let store = StateStore::new(StateMap::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.merge(map(json!({"a": 1})));
        drop(sub);
        store.merge(map(json!({"a": 2})));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_may_read_the_store() {
        let store = StateStore::new(StateMap::new());
        let reader = store.clone();
        let observed = Arc::new(AtomicUsize::new(0));
        let sink = observed.clone();
        let _sub = store.subscribe(move |_| {
            sink.store(reader.snapshot().len(), Ordering::SeqCst);
        });

        store.merge(map(json!({"a": 1, "b": 2})));
        assert_eq!(observed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handle_merges_after_unmount_are_dropped() {
        let store = StateStore::new(map(json!({"a": 1})));
        let handle = store.handle();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _sub = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.unmount();

        assert!(!handle.merge(map(json!({"a": 2}))));
        assert_eq!(*store.snapshot(), map(json!({"a": 1})));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handle_outliving_store_is_inert() {
        let handle = StateStore::new(StateMap::new()).handle();
        assert!(!handle.merge(map(json!({"a": 1}))));
    }
}
