//! Listener registration mechanics shared by the change feed and the identity
//! provider.
//!
//! External sources deliver on their own threads by invoking a callback. The
//! engine's callbacks only enqueue a message for its ingestion thread, so a
//! delivery never blocks for long.
//!
//! ## Termination guarantee
//!
//! [`ListenerRegistry::dispatch`] holds the registry lock while it invokes
//! listeners, and [`Subscription::unsubscribe`] takes the same lock to remove
//! its entry. Once `unsubscribe` returns, the listener is never called again.
//! The flip side: a listener must not unsubscribe (or drop its own
//! [`Subscription`]) from inside a delivery.

use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;

/// Callback invoked for every delivery.
pub type Listener<M> = Arc<dyn Fn(M) + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Dispatch failed due to internal lock poisoning.
    #[error("listener registry lock poisoned")]
    Poisoned,
}

struct Entry<K, M> {
    id: u64,
    key: K,
    listener: Listener<M>,
}

struct RegistryInner<K, M> {
    next_id: u64,
    entries: Vec<Entry<K, M>>,
}

/// Keyed fan-out of messages to registered listeners.
///
/// - No IO / no async
/// - Listeners are matched by key equality (account + collection for feeds)
/// - Registration returns a [`Subscription`] that removes the entry
pub struct ListenerRegistry<K, M> {
    inner: Mutex<RegistryInner<K, M>>,
}

impl<K, M> core::fmt::Debug for ListenerRegistry<K, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let len = self.inner.lock().map(|i| i.entries.len()).unwrap_or(0);
        f.debug_struct("ListenerRegistry").field("listeners", &len).finish()
    }
}

impl<K, M> ListenerRegistry<K, M>
where
    K: PartialEq + Send + 'static,
    M: Clone + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                entries: Vec::new(),
            }),
        })
    }

    /// Register a listener under `key`.
    ///
    /// If the lock is poisoned the returned subscription is inert: it never
    /// receives messages.
    pub fn register(self: &Arc<Self>, key: K, listener: Listener<M>) -> Subscription {
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.entries.push(Entry { id, key, listener });
                id
            }
            Err(_) => return Subscription::detached(),
        };

        let registry: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        })
    }

    /// Deliver `message` to every listener registered under `key`.
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, key: &K, message: M) -> Result<usize, RegistryError> {
        let inner = self.inner.lock().map_err(|_| RegistryError::Poisoned)?;

        let mut delivered = 0;
        for entry in inner.entries.iter().filter(|e| &e.key == key) {
            (entry.listener)(message.clone());
            delivered += 1;
        }

        Ok(delivered)
    }

    /// Number of live listeners registered under `key`.
    pub fn count(&self, key: &K) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.entries.iter().filter(|e| &e.key == key).count())
            .unwrap_or(0)
    }

    fn remove(&self, id: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.retain(|e| e.id != id);
        }
    }
}

/// Handle to a registered listener.
///
/// `unsubscribe` is idempotent; dropping the handle unsubscribes too.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// A subscription that is not attached to any source.
    pub fn detached() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    /// Stop delivery. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        let cancel = match self.cancel.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.lock().map(|c| c.is_some()).unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
