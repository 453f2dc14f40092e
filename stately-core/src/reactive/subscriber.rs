//! Subscriber types for the reactive system.
//!
//! Every call to `subscribe` on a signal or a store registers one listener
//! under a fresh [`SubscriberId`]. Removal goes by that id, never by index or
//! by closure identity, so the same callback can be registered twice and each
//! registration is disposed of independently.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

/// Unique identifier for a listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a listener list taken when a notification round begins.
pub(crate) type Snapshot<F> = SmallVec<[Arc<F>; 4]>;

/// Ordered list of listeners.
///
/// `F` is the unsized callback type, e.g. `dyn Fn(&T) + Send + Sync`.
pub(crate) struct ListenerList<F: ?Sized> {
    entries: Mutex<Vec<(SubscriberId, Arc<F>)>>,
}

impl<F: ?Sized> ListenerList<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append a listener and return the id of the new registration.
    pub(crate) fn add(&self, listener: Arc<F>) -> SubscriberId {
        let id = SubscriberId::new();
        self.entries.lock().push((id, listener));
        id
    }

    /// Remove the registration with the given id.
    ///
    /// Returns `false` if it was already gone.
    pub(crate) fn remove(&self, id: SubscriberId) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|(entry_id, _)| *entry_id == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Copy the current listeners, in subscription order.
    ///
    /// The lock is released before the caller invokes anything, so listeners
    /// may subscribe, unsubscribe or write back into the owner.
    pub(crate) fn snapshot(&self) -> Snapshot<F> {
        self.entries
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Disposer returned by every `subscribe` call.
///
/// [`dispose`](Subscription::dispose) removes the registration on its first
/// call and does nothing afterwards. Clones share the same registration.
/// Dropping a `Subscription` leaves the listener registered.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriberId,
    unsubscribe: Arc<Mutex<Option<Unsubscribe>>>,
}

impl Subscription {
    /// Build a subscription that removes `id` from `list` when disposed.
    ///
    /// Only a weak reference to the list is kept, so an outstanding
    /// subscription does not keep its signal or store alive.
    pub(crate) fn new<F>(list: &Arc<ListenerList<F>>, id: SubscriberId) -> Self
    where
        F: ?Sized + Send + Sync + 'static,
    {
        let list: Weak<ListenerList<F>> = Arc::downgrade(list);
        let unsubscribe: Unsubscribe = Box::new(move || {
            if let Some(list) = list.upgrade() {
                let removed = list.remove(id);
                tracing::debug!(?id, removed, "listener unsubscribed");
            }
        });
        Self {
            id,
            unsubscribe: Arc::new(Mutex::new(Some(unsubscribe))),
        }
    }

    /// Id of the registration this handle controls.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the listener. Safe to call any number of times.
    pub fn dispose(&self) {
        // Take first so the lock is not held while the list is modified.
        let unsubscribe = self.unsubscribe.lock().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }

    /// Whether [`dispose`](Subscription::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.unsubscribe.lock().is_none()
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
