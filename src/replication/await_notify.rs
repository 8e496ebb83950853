use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Keyed wakeups: waiters park on a key, producers for that key wake them
/// all. Latches are refcounted and removed when the last waiter leaves, so
/// the map only ever holds keys someone is actually waiting on.
pub struct AwaitNotify<K: Eq + Hash + Clone> {
    latches: Mutex<HashMap<K, Arc<Latch>>>,
}

struct Latch {
    notify: Notify,
    waiters: AtomicUsize,
}

impl<K: Eq + Hash + Clone> AwaitNotify<K> {
    pub fn new() -> Self {
        Self {
            latches: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a waiter on the key. Hold the returned guard for the whole
    /// wait; dropping it releases the latch.
    pub fn waiter(&self, key: K) -> Waiter<'_, K> {
        let latch = {
            let mut latches = self.latches.lock();
            let latch = latches
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(Latch {
                        notify: Notify::new(),
                        waiters: AtomicUsize::new(0),
                    })
                })
                .clone();
            latch.waiters.fetch_add(1, Ordering::SeqCst);
            latch
        };
        Waiter {
            owner: self,
            key,
            latch,
        }
    }

    /// Wakes everyone currently waiting on the key. A no-op when nobody is.
    pub fn notify(&self, key: &K) {
        let latch = self.latches.lock().get(key).cloned();
        if let Some(latch) = latch {
            latch.notify.notify_waiters();
        }
    }

    pub fn notify_all(&self) {
        let latches: Vec<_> = self.latches.lock().values().cloned().collect();
        for latch in latches {
            latch.notify.notify_waiters();
        }
    }
}

impl<K: Eq + Hash + Clone> Default for AwaitNotify<K> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Waiter<'a, K: Eq + Hash + Clone> {
    owner: &'a AwaitNotify<K>,
    key: K,
    latch: Arc<Latch>,
}

impl<K: Eq + Hash + Clone> Waiter<'_, K> {
    /// The future must be created (and polled or enabled) before checking
    /// the awaited condition, or a wakeup between check and await is lost.
    pub fn notified(&self) -> Notified<'_> {
        self.latch.notify.notified()
    }
}

impl<K: Eq + Hash + Clone> Drop for Waiter<'_, K> {
    fn drop(&mut self) {
        if self.latch.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut latches = self.owner.latches.lock();
            // only drop the map entry if it is still our latch and nobody
            // re-registered while we were unwinding
            if let Some(current) = latches.get(&self.key) {
                if Arc::ptr_eq(current, &self.latch)
                    && current.waiters.load(Ordering::SeqCst) == 0
                {
                    latches.remove(&self.key);
                }
            }
        }
    }
}
