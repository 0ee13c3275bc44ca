//! Synchronous callback registry with RAII deregistration.
//!
//! Callbacks run on the emitting thread, in subscription order, and never while the
//! registry lock is held, so a callback may subscribe, unsubscribe or emit again.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback<T>>,
}

fn lock<T>(m: &Mutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Listeners<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Registry { next_id: 0, callbacks: BTreeMap::new() })) }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut reg = lock(&self.inner);
            let id = reg.next_id;
            reg.next_id += 1;
            reg.callbacks.insert(id, Arc::new(callback));
            id
        };
        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            unregister: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).callbacks.remove(&id);
                }
            })),
        }
    }

    /// Invoke every callback registered at the time of the call. Returns how many ran.
    pub fn emit(&self, value: &T) -> usize {
        let callbacks: Vec<Callback<T>> = lock(&self.inner).callbacks.values().cloned().collect();
        for cb in callbacks.iter() {
            cb(value);
        }
        callbacks.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`Listeners::subscribe`]; dropping it deregisters the callback.
#[must_use = "dropping a Subscription deregisters its callback"]
pub struct Subscription {
    unregister: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unregister.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unregister.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.unregister.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn drop_deregisters() {
        let l: Listeners<u32> = Listeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = l.subscribe(move |v| {
            h.fetch_add(*v as usize, Ordering::SeqCst);
        });
        assert_eq!(l.emit(&2), 1);
        drop(sub);
        assert_eq!(l.emit(&5), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(l.is_empty());
    }

    #[test]
    fn callback_may_reenter_registry() {
        let l: Listeners<u32> = Listeners::new();
        let l2 = l.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let _sub = l.subscribe(move |v| {
            s.fetch_add(1, Ordering::SeqCst);
            if *v > 0 {
                l2.emit(&(v - 1));
            }
        });
        l.emit(&2);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
