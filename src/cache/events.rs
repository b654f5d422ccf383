//! Cache Events Module
//!
//! Structured hook the engine calls on every cache decision, so observability
//! backends can subscribe instead of parsing log lines.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;

/// Kind of cache activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventKind {
    Hit,
    Miss,
    StaleServed,
    FetchSuccess,
    FetchFailure,
    Mutate,
    Invalidate,
    Sweep,
}

impl fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheEventKind::Hit => "hit",
            CacheEventKind::Miss => "miss",
            CacheEventKind::StaleServed => "stale_served",
            CacheEventKind::FetchSuccess => "fetch_success",
            CacheEventKind::FetchFailure => "fetch_failure",
            CacheEventKind::Mutate => "mutate",
            CacheEventKind::Invalidate => "invalidate",
            CacheEventKind::Sweep => "sweep",
        };
        f.write_str(name)
    }
}

/// One cache event.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    /// Affected key; empty for store-wide events such as sweeps
    pub key: String,
    /// Fetcher latency for fetch events
    pub duration: Option<Duration>,
}

impl CacheEvent {
    pub fn new(kind: CacheEventKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Listener invoked for every event.
pub type EventListener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Fan-out of cache events to registered listeners.
#[derive(Default)]
pub struct EventHub {
    listeners: RwLock<Vec<EventListener>>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add event listener
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(Arc::new(listener));
        }
    }

    /// Emit event to all listeners
    pub fn emit(&self, event: CacheEvent) {
        let listeners: Vec<EventListener> = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}
