//! Store Implementation
//!
//! A Store is a [`Signal`] plus a fixed set of named update functions, a list
//! of event-tagged listeners and an optional middleware chain.
//!
//! # Dispatch
//!
//! `dispatch(name, args)` runs, in this order:
//!
//! 1. look up `name` (unknown names fail with nothing changed);
//! 2. compute the next state from a clone of the current one (a failing
//!    update function leaves state and listeners untouched);
//! 3. write it into the signal, which notifies signal subscribers and
//!    derived cells;
//! 4. notify store listeners with `(state, name, args)`;
//! 5. run the middleware chain, spawning it onto tokio if it suspends.
//!
//! Steps 3 and 4 are never rolled back, whatever the middleware does.
//!
//! Steps 1 to 3 hold the store's dispatch lock, so concurrent dispatches apply
//! one after another and none is lost. The lock is reentrant: a signal
//! subscriber may dispatch again from inside step 3.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use serde::{Serialize, Serializer};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::error::StoreError;
use super::middleware::{Bundle, ChainRunner, Tail};
use super::reducer::Reducers;
use crate::reactive::{ListenerList, Signal, Subscription};

type StoreListener<S, A> = dyn Fn(&S, &str, &A) + Send + Sync;

struct Inner<S, A> {
    reducers: Reducers<S, A>,
    middleware: Option<ChainRunner<S, A>>,
    listeners: Arc<ListenerList<StoreListener<S, A>>>,
    /// Held from reading the state until the next state is written.
    dispatching: ReentrantMutex<()>,
}

/// A state container with named updates.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use stately_core::{create_store, Reducers};
///
/// let store = create_store(0, Reducers::<i32>::new().add("inc", |s, _| s + 1));
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let _sub = store.subscribe(move |state, event, _| {
///     sink.lock().unwrap().push((*state, event.to_string()));
/// });
///
/// for _ in 0..3 {
///     store.dispatch("inc", ()).unwrap();
/// }
///
/// assert_eq!(store.get_state(), 3);
/// assert_eq!(seen.lock().unwrap().len(), 3);
/// ```
pub struct Store<S, A = ()>
where
    S: Clone + Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    state: Signal<S>,
    inner: Arc<Inner<S, A>>,
}

/// Create a store from an initial state and either a [`Reducers`] map or a
/// [`Bundle`] built with [`apply_middleware`](super::apply_middleware).
pub fn create_store<S, A>(initial: S, config: impl Into<Bundle<S, A>>) -> Store<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    Store::new(initial, config)
}

impl<S, A> Store<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    pub fn new(initial: S, config: impl Into<Bundle<S, A>>) -> Self {
        let Bundle {
            reducers,
            middleware,
        } = config.into();

        let state = Signal::new(initial);
        tracing::debug!(
            signal = state.id(),
            updates = ?reducers,
            middleware = middleware.as_ref().map_or(0, ChainRunner::len),
            "store created"
        );

        Self {
            state,
            inner: Arc::new(Inner {
                reducers,
                middleware,
                listeners: Arc::new(ListenerList::new()),
                dispatching: ReentrantMutex::new(()),
            }),
        }
    }

    /// Current state.
    pub fn get_state(&self) -> S {
        self.state.get()
    }

    /// Alias of [`get_state`](Store::get_state).
    pub fn get(&self) -> S {
        self.state.get()
    }

    /// Overwrite the state directly.
    ///
    /// Only subscribers of [`state`](Store::state) (and cells derived from it)
    /// are notified. Store listeners and middleware do not run.
    pub fn set(&self, value: S) {
        let _guard = self.inner.dispatching.lock();
        self.state.set(value);
    }

    /// The underlying signal, for bindings that only need raw values.
    pub fn state(&self) -> &Signal<S> {
        &self.state
    }

    /// Register a listener called after every successful update with the
    /// new state, the update name and the arguments.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&S, &str, &A) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.add(Arc::new(listener));
        tracing::debug!(?id, "store listener subscribed");
        Subscription::new(&self.inner.listeners, id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Apply the update registered as `name`.
    ///
    /// On success the returned [`Dispatched`] holds the new state and, if a
    /// middleware suspended, the task running the rest of the chain.
    ///
    /// Dispatches from several threads are applied one at a time. Store
    /// listeners and middleware run after the lock is released.
    pub fn dispatch(&self, name: &str, args: A) -> Result<Dispatched<S>, StoreError> {
        let next = {
            let _guard = self.inner.dispatching.lock();
            let reducer = self
                .inner
                .reducers
                .get(name)
                .ok_or_else(|| StoreError::UnknownUpdate(name.to_owned()))?;

            let current = self.state.get();
            let next = reducer(&current, &args).map_err(|source| StoreError::Update {
                name: name.to_owned(),
                source,
            })?;

            self.state.set(next.clone());
            next
        };

        let listeners = self.inner.listeners.snapshot();
        tracing::trace!(event = name, listeners = listeners.len(), "update applied");
        for listener in listeners {
            listener(&next, name, &args);
        }

        let pending = match &self.inner.middleware {
            Some(chain) => chain
                .run(name, args, next.clone())
                .map_err(|source| StoreError::Middleware {
                    event: name.to_owned(),
                    source,
                })?
                .map(|tail| spawn_tail(name, tail))
                .transpose()?,
            None => None,
        };

        Ok(Dispatched {
            event: name.to_owned(),
            state: next,
            pending,
        })
    }

    /// A handle bound to one update name.
    pub fn action(&self, name: &str) -> Result<Action<S, A>, StoreError> {
        if !self.inner.reducers.contains(name) {
            return Err(StoreError::UnknownUpdate(name.to_owned()));
        }
        Ok(Action {
            store: self.clone(),
            name: Arc::from(name),
        })
    }

    /// Configured update names, in registration order.
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.inner.reducers.names()
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.inner.reducers.contains(name)
    }
}

fn spawn_tail(event: &str, tail: Tail) -> Result<JoinHandle<Result<(), StoreError>>, StoreError> {
    let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime {
        event: event.to_owned(),
    })?;
    tracing::trace!(event, "middleware chain continues in background");

    let span = tracing::trace_span!("middleware_tail", event);
    let event = event.to_owned();
    Ok(runtime.spawn(
        async move {
            tail.await
                .map_err(|source| StoreError::Middleware { event, source })
        }
        .instrument(span),
    ))
}

impl<S, A> Clone for Store<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A> Debug for Store<S, A>
where
    S: Clone + Send + Sync + Debug + 'static,
    A: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.state)
            .field("updates", &self.inner.reducers)
            .field(
                "middleware",
                &self.inner.middleware.as_ref().map_or(0, ChainRunner::len),
            )
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<S, A> Serialize for Store<S, A>
where
    S: Clone + Send + Sync + Serialize + 'static,
    A: Send + Sync + 'static,
{
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        self.state.serialize(serializer)
    }
}

/// Result of a successful dispatch.
///
/// Dropping it detaches any middleware still running; the chain carries on.
#[derive(Debug)]
pub struct Dispatched<S> {
    event: String,
    state: S,
    pending: Option<JoinHandle<Result<(), StoreError>>>,
}

impl<S> Dispatched<S> {
    /// Name of the update that ran.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// State produced by the update.
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    /// Whether middleware for this dispatch is still running.
    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the middleware chain to finish and return the state.
    ///
    /// A panic inside the chain is resumed on the caller.
    pub async fn settled(self) -> Result<S, StoreError> {
        if let Some(handle) = self.pending {
            match handle.await {
                Ok(result) => result?,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => return Err(StoreError::Cancelled { event: self.event }),
            }
        }
        Ok(self.state)
    }
}

/// An update name bound to its store.
pub struct Action<S, A = ()>
where
    S: Clone + Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    store: Store<S, A>,
    name: Arc<str>,
}

impl<S, A> Action<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatch this update with `args`.
    pub fn call(&self, args: A) -> Result<Dispatched<S>, StoreError> {
        self.store.dispatch(&self.name, args)
    }
}

impl<S, A> Clone for Action<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: Arc::clone(&self.name),
        }
    }
}

impl<S, A> Debug for Action<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
