//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive: a single mutable value
//! plus an ordered list of listeners.
//!
//! # How Signals Work
//!
//! 1. `set` replaces the value.
//!
//! 2. The listener list is snapshotted and every listener is called with the
//!    new value, in subscription order, before `set` returns.
//!
//! 3. `map` builds a [`Derived`] cell that is driven by a hidden listener on
//!    the source. The link is permanent.
//!
//! # Thread Safety
//!
//! Handles are `Send + Sync` and cheap to clone. The value sits behind a
//! `parking_lot::RwLock`; neither the value lock nor the listener lock is held
//! while a listener runs, so a listener may read or write any signal,
//! including the one that is notifying it.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Serialize, Serializer};

use super::subscriber::{ListenerList, Subscription};

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique signal ID.
fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type Listener<T> = dyn Fn(&T) + Send + Sync;

/// Storage shared by every handle to one cell.
struct Core<T> {
    id: u64,
    value: RwLock<T>,
    listeners: Arc<ListenerList<Listener<T>>>,
}

impl<T> Core<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            id: next_signal_id(),
            value: RwLock::new(value),
            listeners: Arc::new(ListenerList::new()),
        })
    }

    fn get(&self) -> T {
        self.value.read().clone()
    }

    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.read())
    }

    fn set(&self, value: T) {
        *self.value.write() = value.clone();

        let listeners = self.listeners.snapshot();
        tracing::trace!(signal = self.id, listeners = listeners.len(), "signal set");
        for listener in listeners {
            listener(&value);
        }
    }

    fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.listeners.add(Arc::new(listener));
        tracing::debug!(signal = self.id, ?id, "signal listener subscribed");
        Subscription::new(&self.listeners, id)
    }

    fn map<W, F>(&self, f: F) -> Arc<Core<W>>
    where
        W: Clone + Send + Sync + 'static,
        F: Fn(&T) -> W + Send + Sync + 'static,
    {
        let derived = Core::new(self.with(&f));
        let target = Arc::clone(&derived);
        // Never disposed: the derived cell follows its source for good.
        self.listeners.add(Arc::new(move |next: &T| target.set(f(next))));
        tracing::debug!(source = self.id, derived = derived.id, "derived signal created");
        derived
    }
}

/// A reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the signal. Must be Clone + Send + Sync.
///
/// # Example
///
/// ```rust
/// use stately_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// let doubled = count.map(|n| n * 2);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: Arc<Core<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            core: Core::new(value),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.core.get()
    }

    /// Borrow the current value without cloning it.
    ///
    /// The value is read-locked for the duration of `f`; calling `set` on the
    /// same signal from inside `f` deadlocks.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.core.with(f)
    }

    /// Set a new value and notify subscribers.
    pub fn set(&self, value: T) {
        self.core.set(value);
    }

    /// Update the value using a function.
    ///
    /// This is useful for updates that depend on the current value. `f` gets
    /// a clone, so it may read the signal again.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.core.get();
        self.core.set(f(&current));
    }

    /// Register a listener called with every value passed to `set`.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.core.subscribe(listener)
    }

    /// Derive a read-only cell holding `f` of this signal's value.
    ///
    /// The derived cell starts at `f(&self.get())` and receives `f(&next)` on
    /// every later `set`. The starting value is not re-emitted to the derived
    /// cell's listeners.
    pub fn map<W, F>(&self, f: F) -> Derived<W>
    where
        W: Clone + Send + Sync + 'static,
        F: Fn(&T) -> W + Send + Sync + 'static,
    {
        Derived {
            core: self.core.map(f),
        }
    }

    /// Get the number of listeners, derived cells included.
    pub fn subscriber_count(&self) -> usize {
        self.core.listeners.len()
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.core.id)
            .field("value", &*self.core.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<T> Serialize for Signal<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.core.with(|value| value.serialize(serializer))
    }
}

/// A read-only cell driven by another cell through [`Signal::map`].
///
/// It has no `set`: its value only ever comes from the source.
pub struct Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: Arc<Core<T>>,
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Get the cell's unique ID.
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.core.get()
    }

    /// Borrow the current value without cloning it.
    ///
    /// The source cannot push a new value while `f` runs.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.core.with(f)
    }

    /// Register a listener called with every value pushed from the source.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.core.subscribe(listener)
    }

    /// Derive again. See [`Signal::map`].
    pub fn map<W, F>(&self, f: F) -> Derived<W>
    where
        W: Clone + Send + Sync + 'static,
        F: Fn(&T) -> W + Send + Sync + 'static,
    {
        Derived {
            core: self.core.map(f),
        }
    }

    /// Get the number of listeners, derived cells included.
    pub fn subscriber_count(&self) -> usize {
        self.core.listeners.len()
    }
}

impl<T> Clone for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Debug for Derived<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.core.id)
            .field("value", &*self.core.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<T> Serialize for Derived<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.core.with(|value| value.serialize(serializer))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
