//! Event bus.
//!
//! Publish/subscribe keyed by event. Delivery is synchronous, in
//! registration order, on the publishing thread. A panicking subscriber
//! is caught and logged; delivery continues to the remaining subscribers.
//! Listeners are removed by the token handed out at registration.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::util::relock;

/// Token identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<P> = Arc<Mutex<dyn FnMut(&P) + Send>>;

/// A key → listener-list event bus.
pub struct Emitter<K, P> {
    listeners: Mutex<HashMap<K, Vec<(u64, Callback<P>)>>>,
    next_id: AtomicU64,
}

impl<K: Eq + Hash + Clone, P> Emitter<K, P> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for an event.
    pub fn on(&self, key: K, callback: impl FnMut(&P) + Send + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        relock(&self.listeners)
            .entry(key)
            .or_default()
            .push((id, Arc::new(Mutex::new(callback))));
        ListenerId(id)
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn off(&self, key: &K, id: ListenerId) -> bool {
        let mut listeners = relock(&self.listeners);
        let Some(list) = listeners.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(listener_id, _)| *listener_id != id.0);
        let removed = list.len() < before;
        if list.is_empty() {
            listeners.remove(key);
        }
        removed
    }

    /// Deliver a payload to every listener of an event, in registration
    /// order.
    pub fn emit(&self, key: &K, payload: &P) {
        // Snapshot outside the registry lock so listeners can subscribe
        // and unsubscribe from inside their own callbacks.
        let snapshot: Vec<Callback<P>> = {
            let listeners = relock(&self.listeners);
            match listeners.get(key) {
                Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };
        for callback in snapshot {
            Self::invoke(&callback, payload);
        }
    }

    /// Deliver a payload to a single listener.
    pub fn emit_to(&self, key: &K, id: ListenerId, payload: &P) {
        let callback = {
            let listeners = relock(&self.listeners);
            listeners.get(key).and_then(|list| {
                list.iter()
                    .find(|(listener_id, _)| *listener_id == id.0)
                    .map(|(_, cb)| Arc::clone(cb))
            })
        };
        if let Some(callback) = callback {
            Self::invoke(&callback, payload);
        }
    }

    fn invoke(callback: &Callback<P>, payload: &P) {
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut callback = relock(callback);
            callback(payload);
        }));
        if result.is_err() {
            tracing::warn!("event subscriber panicked; continuing delivery");
        }
    }

    /// Number of listeners registered for an event.
    pub fn listener_count(&self, key: &K) -> usize {
        relock(&self.listeners)
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Drop every listener.
    pub fn clear(&self) {
        relock(&self.listeners).clear();
    }
}

impl<K: Eq + Hash + Clone, P> Default for Emitter<K, P> {
    fn default() -> Self {
        Self::new()
    }
}
