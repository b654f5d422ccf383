//! Subscriber Registry Module
//!
//! Per-key callback sets that keep independent consumers of one key in sync.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tracing::warn;

/// Callback invoked with the new value of a key.
pub type SubscriberCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    subscribers: HashMap<String, HashMap<SubscriberId, SubscriberCallback>>,
}

// == Subscriber Registry ==
/// Maps cache keys to the callbacks interested in them.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("key_count", &self.key_count())
            .finish()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        lock_state(&self.state)
    }

    // == Subscribe ==
    /// Registers `callback` for `key`.
    ///
    /// The returned guard removes exactly this callback when dropped.
    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let key = key.into();
        let mut state = self.lock();
        let id = SubscriberId(state.next_id);
        state.next_id += 1;
        state
            .subscribers
            .entry(key.clone())
            .or_default()
            .insert(id, Arc::new(callback));

        Subscription {
            key,
            id,
            registry: Arc::downgrade(&self.state),
        }
    }

    // == Notify ==
    /// Invokes every callback registered for `key`, skipping `except`.
    ///
    /// Callbacks run outside the registry lock. A panicking callback is logged
    /// and does not stop the others. Returns how many callbacks ran cleanly.
    pub fn notify(&self, key: &str, value: &Value, except: Option<SubscriberId>) -> usize {
        let callbacks: Vec<SubscriberCallback> = {
            let state = self.lock();
            match state.subscribers.get(key) {
                Some(set) => set
                    .iter()
                    .filter(|(id, _)| Some(**id) != except)
                    .map(|(_, cb)| Arc::clone(cb))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for callback in callbacks {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    warn!(key, reason = %panic_message(&*payload), "Subscriber callback panicked");
                }
            }
        }
        delivered
    }

    // == Housekeeping ==
    /// Drops every subscriber for every key.
    pub fn clear(&self) {
        self.lock().subscribers.clear();
    }

    /// Number of callbacks registered for `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.lock().subscribers.get(key).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of keys with at least one subscriber.
    pub fn key_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

fn lock_state(state: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn remove(state: &Mutex<RegistryState>, key: &str, id: SubscriberId) {
    let mut state = lock_state(state);
    if let Some(set) = state.subscribers.get_mut(key) {
        set.remove(&id);
        if set.is_empty() {
            state.subscribers.remove(key);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// == Subscription ==
/// Unsubscribe handle returned by [`SubscriberRegistry::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    key: String,
    id: SubscriberId,
    registry: Weak<Mutex<RegistryState>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Removes the callback now instead of at drop.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.registry.upgrade() {
            remove(&state, &self.key, self.id);
        }
    }
}
