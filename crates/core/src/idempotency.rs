//! Deduplication of create requests keyed by a client supplied token.
//!
//! Each key owns a slot holding a [`OnceCell`]. The first caller to reach an
//! empty slot runs the create closure while later callers with the same key
//! wait on the cell, so the underlying mutation runs at most once per key
//! that ever succeeds. A failed create leaves the cell empty: the next waiter
//! (or a later retry) gets to run its own closure. Empty slots are dropped
//! from the map when their last caller leaves, whether it failed or was
//! cancelled.
//!
//! Records are process-local and never expire.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::OnceCell;

/// Result of a guarded create along with whether it was served from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarded<T> {
    pub value: T,
    pub replayed: bool,
}

/// Concurrent idempotency store with per-key single-flight execution.
#[derive(Debug)]
pub struct IdempotencyGuard<T> {
    slots: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for IdempotencyGuard<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> IdempotencyGuard<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `create(payload)` unless a result is already recorded for `key`.
    ///
    /// A missing or blank key disables deduplication entirely. Errors from
    /// `create` are returned unchanged and nothing is recorded for the key.
    pub async fn guarded_create<P, F, Fut, E>(
        &self,
        key: Option<&str>,
        payload: P,
        create: F,
    ) -> Result<Guarded<T>, E>
    where
        F: FnOnce(P) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(key) = key.map(str::trim).filter(|key| !key.is_empty()) else {
            let value = create(payload).await?;
            return Ok(Guarded {
                value,
                replayed: false,
            });
        };

        // Released on every exit, including a dropped caller future.
        let release = SlotRelease {
            guard: self,
            key,
            slot: self.slot(key),
        };
        let mut executed = false;
        let value = release
            .slot
            .get_or_try_init(|| {
                executed = true;
                create(payload)
            })
            .await
            .map(T::clone)?;

        Ok(Guarded {
            value,
            replayed: !executed,
        })
    }

    /// Returns the recorded result for `key`, if any.
    pub fn recorded(&self, key: &str) -> Option<T> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of keys with a recorded result.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &str) -> Arc<OnceCell<T>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // Drops an empty slot once no other caller is waiting on it.
    fn release_if_vacant(&self, key: &str, slot: &Arc<OnceCell<T>>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let vacant = slots.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(current) == 2
        });
        if vacant {
            slots.remove(key);
        }
    }
}

struct SlotRelease<'a, T: Clone> {
    guard: &'a IdempotencyGuard<T>,
    key: &'a str,
    slot: Arc<OnceCell<T>>,
}

impl<T: Clone> Drop for SlotRelease<'_, T> {
    fn drop(&mut self) {
        self.guard.release_if_vacant(self.key, &self.slot);
    }
}
