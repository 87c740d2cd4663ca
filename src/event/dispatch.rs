use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::runtime::Event;

/// Callback invoked when an event fires.
pub type FireCallback = Arc<dyn Fn(&Arc<Event>) + Send + Sync>;

/// A multicast subscriber list: single delivery per subscriber per fire,
/// synchronous on the firing thread. Panicking subscribers are logged and
/// never break the fire chain.
#[derive(Default)]
pub struct SubscriberList {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, FireCallback>>,
}

impl SubscriberList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: FireCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.insert(id, callback);
        }
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers
            .lock()
            .map(|mut subscribers| subscribers.remove(&id).is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.clear();
        }
    }

    pub fn emit(&self, event: &Arc<Event>) {
        // Snapshot so user callbacks run without holding the lock
        let snapshot: Vec<FireCallback> = match self.subscribers.lock() {
            Ok(subscribers) => subscribers.values().cloned().collect(),
            Err(_) => return,
        };

        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(
                    "subscriber panicked while handling fire of event '{}'",
                    event.name()
                );
            }
        }
    }
}
