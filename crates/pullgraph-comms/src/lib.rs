//! Keyed publish/subscribe for the control domain.
//!
//! A [`Subject`] emits notifications tagged with a key. Handlers registered
//! through [`Subject::observe`] (one key) or [`Subject::observe_all`]
//! (wildcard) fire synchronously on the thread calling [`Subject::notify`].
//!
//! Registration returns an [`Observer`] token. Dropping the token removes
//! its handler; dropping the subject drops every handler it holds, leaving
//! outstanding tokens detached.
//!
//! Notifications are a control-domain facility. Never notify from the
//! render thread: handlers may allocate and lock.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::{Arc, Weak};

type Handler<K, V> = dyn Fn(&K, &V) + Send + Sync;

struct Entry<K, V> {
    id: u64,
    /// `None` matches every key
    key: Option<K>,
    handler: Arc<Handler<K, V>>,
}

struct Registry<K, V> {
    next_id: u64,
    entries: Vec<Entry<K, V>>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<K: Send, V> Detach for Mutex<Registry<K, V>> {
    fn detach(&self, id: u64) {
        self.lock().entries.retain(|entry| entry.id != id);
    }
}

/// Emitter of keyed notifications
pub struct Subject<K, V> {
    registry: Arc<Mutex<Registry<K, V>>>,
}

impl<K, V> Subject<K, V>
where
    K: PartialEq + Send + 'static,
    V: 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a handler for one key
    pub fn observe<F>(&self, key: K, handler: F) -> Observer
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.register(Some(key), Arc::new(handler))
    }

    /// Register a handler for every key
    pub fn observe_all<F>(&self, handler: F) -> Observer
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Invoke every handler registered for `key` and every wildcard handler.
    ///
    /// Handlers run after the registry lock is released, so they may
    /// register or drop observers on this subject.
    pub fn notify(&self, key: &K, value: &V) {
        let handlers: SmallVec<[Arc<Handler<K, V>>; 4]> = {
            let registry = self.registry.lock();
            registry
                .entries
                .iter()
                .filter(|entry| entry.key.as_ref().is_none_or(|k| k == key))
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };

        for handler in handlers {
            handler(key, value);
        }
    }

    /// Number of live handlers
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.registry.lock().entries.len()
    }

    fn register(&self, key: Option<K>, handler: Arc<Handler<K, V>>) -> Observer {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push(Entry { id, key, handler });
            id
        };

        let registry: Arc<dyn Detach> = self.registry.clone();
        Observer {
            registry: Arc::downgrade(&registry),
            id,
        }
    }
}

impl<K, V> Default for Subject<K, V>
where
    K: PartialEq + Send + 'static,
    V: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription token returned by [`Subject::observe`]
pub struct Observer {
    registry: Weak<dyn Detach>,
    id: u64,
}

impl Observer {
    /// Whether the subject this observer was registered on still exists
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.registry.strong_count() > 0
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}
