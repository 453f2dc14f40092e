//! Middleware Chain
//!
//! Middlewares observe an update after it has been applied and after every
//! store listener has run. They are arranged in a fixed sequence when the
//! store is built and run in that order for every dispatch.
//!
//! # How the Chain Advances
//!
//! There are two kinds of middleware:
//!
//! - **auto**: never sees a continuation. Once it returns, the next
//!   middleware runs. If it returns [`Step::Pending`], the next middleware
//!   runs after that future resolves.
//!
//! - **manual**: receives a [`Proceed`] handle and is responsible for
//!   chaining. Returning [`Step::Done`] without calling [`Proceed::run`] ends
//!   the chain for this dispatch. Returning [`Step::Pending`] without ever
//!   calling `run` advances once the future resolves. As soon as `run` has
//!   been called, at any point, the automatic advance for that step is
//!   suppressed, so the next middleware runs exactly once.
//!
//! Pending work started by [`Proceed::run`] is parked on the step that called
//! it. If the middleware does not await the returned flow itself, the chain
//! awaits it once the middleware has finished, so the rest of the chain is
//! never lost.
//!
//! An `Err` from a middleware, or from its pending future, stops the chain
//! and is handed back to whoever is waiting on the chain.
//!
//! # Suspension
//!
//! Everything up to the first pending future runs synchronously inside the
//! dispatch call. The remainder is returned as a single boxed future that the
//! store spawns onto the tokio runtime.

use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use super::error::BoxError;
use super::reducer::Reducers;

/// What a middleware (or a call to [`Proceed::run`]) hands back.
pub type Flow = Result<Step, BoxError>;

/// Remaining asynchronous work of a chain.
pub(crate) type Tail = BoxFuture<'static, Result<(), BoxError>>;

/// How a middleware finished.
pub enum Step {
    /// Finished synchronously.
    Done,
    /// Still running; the chain waits for this future before advancing.
    Pending(Tail),
}

impl Step {
    /// Wrap a future as a pending step.
    pub fn pending<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Step::Pending(Box::pin(async move {
            let result: Result<(), BoxError> = future.await.map_err(Into::into);
            result
        }))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Step::Pending(_))
    }

    /// Wait for the step to finish.
    pub async fn settle(self) -> Result<(), BoxError> {
        match self {
            Step::Done => Ok(()),
            Step::Pending(future) => future.await,
        }
    }
}

impl Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Done => f.write_str("Done"),
            Step::Pending(_) => f.write_str("Pending"),
        }
    }
}

type AutoFn<S, A> = dyn Fn(&str, &A, &S) -> Flow + Send + Sync;
type ManualFn<S, A> = dyn Fn(&str, &A, &S, Proceed<S, A>) -> Flow + Send + Sync;

enum Handler<S, A> {
    Auto(Arc<AutoFn<S, A>>),
    Manual(Arc<ManualFn<S, A>>),
}

/// One step of a middleware chain.
///
/// Every middleware is called with the update name, the dispatch arguments
/// and the state the update produced.
pub struct Middleware<S, A = ()> {
    handler: Handler<S, A>,
}

impl<S, A> Middleware<S, A> {
    /// A middleware that does not chain by itself.
    ///
    /// ```rust
    /// use stately_core::{Middleware, Step};
    ///
    /// let log = Middleware::<i32>::auto(|event, _args, state| {
    ///     println!("{event} -> {state}");
    ///     Ok(Step::Done)
    /// });
    /// assert!(!log.is_manual());
    /// ```
    pub fn auto<F>(f: F) -> Self
    where
        F: Fn(&str, &A, &S) -> Flow + Send + Sync + 'static,
    {
        Self {
            handler: Handler::Auto(Arc::new(f)),
        }
    }

    /// A middleware that decides when, or whether, the next one runs.
    pub fn manual<F>(f: F) -> Self
    where
        F: Fn(&str, &A, &S, Proceed<S, A>) -> Flow + Send + Sync + 'static,
    {
        Self {
            handler: Handler::Manual(Arc::new(f)),
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self.handler, Handler::Manual(_))
    }
}

impl<S, A> Clone for Middleware<S, A> {
    fn clone(&self) -> Self {
        let handler = match &self.handler {
            Handler::Auto(f) => Handler::Auto(Arc::clone(f)),
            Handler::Manual(f) => Handler::Manual(Arc::clone(f)),
        };
        Self { handler }
    }
}

impl<S, A> Debug for Middleware<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_manual() { "manual" } else { "auto" };
        f.debug_struct("Middleware").field("kind", &kind).finish()
    }
}

/// The dispatch a chain run is observing.
struct Dispatch<S, A> {
    event: String,
    args: A,
    next_state: S,
}

/// Per-step record of what a manual middleware did with its [`Proceed`].
#[derive(Default)]
struct Control {
    took_control: AtomicBool,
    downstream: Mutex<Option<Tail>>,
}

impl Control {
    fn took_control(&self) -> bool {
        self.took_control.load(Ordering::SeqCst)
    }

    fn take_downstream(&self) -> Option<Tail> {
        self.downstream.lock().take()
    }
}

/// Continuation handed to manual middlewares.
///
/// Consumed by [`run`](Proceed::run), so the next middleware can be started
/// at most once per step.
pub struct Proceed<S, A = ()> {
    middlewares: Arc<[Middleware<S, A>]>,
    dispatch: Arc<Dispatch<S, A>>,
    next: usize,
    control: Arc<Control>,
}

impl<S, A> Proceed<S, A>
where
    S: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    /// Run the rest of the chain.
    ///
    /// Returns the downstream flow: any pending work and any error from the
    /// middlewares after this one. Past the end of the chain this is
    /// `Ok(Step::Done)`.
    ///
    /// Awaiting a pending flow drives the rest of the chain right there.
    /// Dropping it leaves that work to the chain, which awaits it after this
    /// middleware finishes.
    #[must_use = "the flow carries downstream errors"]
    pub fn run(self) -> Flow {
        self.control.took_control.store(true, Ordering::SeqCst);
        let Some(rest) = run_from(self.middlewares, self.dispatch, self.next)? else {
            return Ok(Step::Done);
        };

        *self.control.downstream.lock() = Some(rest);
        let control = self.control;
        Ok(Step::Pending(Box::pin(async move {
            match control.take_downstream() {
                Some(rest) => rest.await,
                None => Ok(()),
            }
        })))
    }

    /// [`run`](Proceed::run) and wait for whatever it started.
    pub async fn run_async(self) -> Result<(), BoxError> {
        self.run()?.settle().await
    }

    /// Whether this middleware is the last in the chain.
    pub fn is_last(&self) -> bool {
        self.next >= self.middlewares.len()
    }
}

impl<S, A> Debug for Proceed<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proceed")
            .field("event", &self.dispatch.event)
            .field("next", &self.next)
            .field("len", &self.middlewares.len())
            .finish()
    }
}

/// Run middlewares starting at `index` until the chain ends, halts or
/// suspends.
fn run_from<S, A>(
    middlewares: Arc<[Middleware<S, A>]>,
    dispatch: Arc<Dispatch<S, A>>,
    mut index: usize,
) -> Result<Option<Tail>, BoxError>
where
    S: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    while let Some(middleware) = middlewares.get(index) {
        let manual = middleware.is_manual();
        let control = Arc::new(Control::default());

        let step = match &middleware.handler {
            Handler::Auto(f) => f(dispatch.event.as_str(), &dispatch.args, &dispatch.next_state),
            Handler::Manual(f) => {
                let proceed = Proceed {
                    middlewares: Arc::clone(&middlewares),
                    dispatch: Arc::clone(&dispatch),
                    next: index + 1,
                    control: Arc::clone(&control),
                };
                f(dispatch.event.as_str(), &dispatch.args, &dispatch.next_state, proceed)
            }
        }?;

        match step {
            // A manual middleware has either already run the rest or chosen
            // to stop here. Downstream work it started but did not await is
            // still owed.
            Step::Done if manual => return Ok(control.take_downstream()),
            Step::Done => index += 1,
            Step::Pending(future) => {
                tracing::trace!(event = %dispatch.event, index, "middleware suspended");
                let next = index + 1;
                return Ok(Some(Box::pin(async move {
                    future.await?;
                    if let Some(rest) = control.take_downstream() {
                        rest.await?;
                    }
                    if control.took_control() {
                        return Ok(());
                    }
                    match run_from(middlewares, dispatch, next)? {
                        Some(rest) => rest.await,
                        None => Ok(()),
                    }
                })));
            }
        }
    }
    Ok(None)
}

/// A frozen, non-empty middleware sequence owned by a store.
pub(crate) struct ChainRunner<S, A> {
    middlewares: Arc<[Middleware<S, A>]>,
}

impl<S, A> ChainRunner<S, A>
where
    S: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    /// Run the chain for one dispatch.
    ///
    /// `Ok(None)` means the chain finished (or halted) synchronously.
    pub(crate) fn run(&self, event: &str, args: A, next_state: S) -> Result<Option<Tail>, BoxError> {
        let dispatch = Arc::new(Dispatch {
            event: event.to_owned(),
            args,
            next_state,
        });
        run_from(Arc::clone(&self.middlewares), dispatch, 0)
    }
}

impl<S, A> ChainRunner<S, A> {
    pub(crate) fn len(&self) -> usize {
        self.middlewares.len()
    }
}

/// Builder for an ordered middleware sequence.
pub struct MiddlewareChain<S, A = ()> {
    middlewares: Vec<Middleware<S, A>>,
}

impl<S, A> MiddlewareChain<S, A> {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware.
    pub fn with(mut self, middleware: Middleware<S, A>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Pair the chain with a reducer map.
    pub fn apply(self, reducers: Reducers<S, A>) -> Bundle<S, A> {
        let middleware = (!self.middlewares.is_empty()).then(|| ChainRunner {
            middlewares: self.middlewares.into(),
        });
        Bundle {
            reducers,
            middleware,
        }
    }
}

impl<S, A> Default for MiddlewareChain<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A> FromIterator<Middleware<S, A>> for MiddlewareChain<S, A> {
    fn from_iter<I: IntoIterator<Item = Middleware<S, A>>>(iter: I) -> Self {
        Self {
            middlewares: iter.into_iter().collect(),
        }
    }
}

/// Build a function that pairs a reducer map with the given middlewares.
///
/// ```rust
/// use stately_core::{apply_middleware, create_store, Middleware, Reducers, Step};
///
/// let with_logging = apply_middleware(vec![Middleware::<i32>::auto(|event, _, state| {
///     println!("{event}: {state}");
///     Ok(Step::Done)
/// })]);
/// let store = create_store(0, with_logging(Reducers::<i32>::new().add("inc", |s, _| s + 1)));
///
/// store.dispatch("inc", ()).unwrap();
/// assert_eq!(store.get_state(), 1);
/// ```
pub fn apply_middleware<S, A, I>(middlewares: I) -> impl FnOnce(Reducers<S, A>) -> Bundle<S, A>
where
    I: IntoIterator<Item = Middleware<S, A>>,
{
    let chain: MiddlewareChain<S, A> = middlewares.into_iter().collect();
    move |reducers| chain.apply(reducers)
}

/// Everything a store is configured with: update functions and, optionally, a
/// middleware chain.
///
/// A bare [`Reducers`] converts into a bundle without middleware.
pub struct Bundle<S, A = ()> {
    pub(crate) reducers: Reducers<S, A>,
    pub(crate) middleware: Option<ChainRunner<S, A>>,
}

impl<S, A> Bundle<S, A> {
    pub fn reducers(&self) -> &Reducers<S, A> {
        &self.reducers
    }

    pub fn has_middleware(&self) -> bool {
        self.middleware.is_some()
    }
}

impl<S, A> From<Reducers<S, A>> for Bundle<S, A> {
    fn from(reducers: Reducers<S, A>) -> Self {
        Self {
            reducers,
            middleware: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, name: &'static str) -> Middleware<i32> {
        let log = log.clone();
        Middleware::auto(move |event, _, state| {
            log.lock().push(format!("{name}:{event}:{state}"));
            Ok(Step::Done)
        })
    }

    fn runner(chain: MiddlewareChain<i32>) -> ChainRunner<i32, ()> {
        chain
            .apply(Reducers::new())
            .middleware
            .expect("non-empty chain")
    }

    #[test]
    fn auto_middlewares_run_in_order() {
        let log: Log = Arc::default();
        let chain = runner(
            MiddlewareChain::<i32>::new()
                .with(recorder(&log, "mw1"))
                .with(recorder(&log, "mw2")),
        );

        let tail = chain.run("inc", (), 1).unwrap();
        assert!(tail.is_none());
        assert_eq!(*log.lock(), vec!["mw1:inc:1", "mw2:inc:1"]);
    }

    #[test]
    fn manual_proceed_runs_next() {
        let log: Log = Arc::default();
        let first = log.clone();
        let chain = runner(
            MiddlewareChain::<i32>::new()
                .with(Middleware::manual(move |event, _, state, proceed| {
                    first.lock().push(format!("mw1:{event}:{state}"));
                    proceed.run()
                }))
                .with(recorder(&log, "mw2")),
        );

        assert!(chain.run("inc", (), 1).unwrap().is_none());
        assert_eq!(*log.lock(), vec!["mw1:inc:1", "mw2:inc:1"]);
    }

    #[test]
    fn manual_without_proceed_halts() {
        let log: Log = Arc::default();
        let first = log.clone();
        let chain = runner(
            MiddlewareChain::<i32>::new()
                .with(Middleware::manual(move |event, _, state, _proceed| {
                    first.lock().push(format!("mw1:{event}:{state}"));
                    Ok(Step::Done)
                }))
                .with(recorder(&log, "mw2")),
        );

        assert!(chain.run("inc", (), 1).unwrap().is_none());
        assert_eq!(*log.lock(), vec!["mw1:inc:1"]);
    }

    #[test]
    fn error_stops_chain() {
        let log: Log = Arc::default();
        let first = log.clone();
        let chain = runner(
            MiddlewareChain::<i32>::new()
                .with(Middleware::auto(move |event, _, state| {
                    first.lock().push(format!("mw1:{event}:{state}"));
                    Err("boom".into())
                }))
                .with(recorder(&log, "mw2")),
        );

        let err = chain.run("inc", (), 1).err().expect("chain fails");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(*log.lock(), vec!["mw1:inc:1"]);
    }

    #[test]
    fn downstream_error_reaches_manual_caller() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let chain = runner(
            MiddlewareChain::<i32>::new()
                .with(Middleware::manual(move |_, _, _, proceed| {
                    let flow = proceed.run();
                    *seen_clone.lock() = flow.as_ref().err().map(|e| e.to_string());
                    flow
                }))
                .with(Middleware::auto(|_, _, _| Err("downstream".into()))),
        );

        assert!(chain.run("inc", (), 1).is_err());
        assert_eq!(seen.lock().as_deref(), Some("downstream"));
    }

    #[test]
    fn proceed_past_end_is_done() {
        let chain = runner(MiddlewareChain::<i32>::new().with(Middleware::manual(|_, _, _, proceed| {
            assert!(proceed.is_last());
            proceed.run()
        })));

        assert!(chain.run("inc", (), 1).unwrap().is_none());
    }

    #[test]
    fn pending_step_returns_tail() {
        let log: Log = Arc::default();
        let chain = runner(
            MiddlewareChain::<i32>::new()
                .with(Middleware::auto(|_, _, _| {
                    Ok(Step::pending(async { Ok::<(), BoxError>(()) }))
                }))
                .with(recorder(&log, "mw2")),
        );

        let tail = chain.run("inc", (), 1).unwrap();
        assert!(tail.is_some());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn dropped_downstream_flow_still_runs() {
        let log: Log = Arc::default();
        let chain = runner(
            MiddlewareChain::<i32>::new()
                .with(Middleware::manual(|_, _, _, proceed| {
                    let _ = proceed.run();
                    Ok(Step::Done)
                }))
                .with(Middleware::auto(|_, _, _| {
                    Ok(Step::pending(async { Ok::<(), BoxError>(()) }))
                }))
                .with(recorder(&log, "mw3")),
        );

        let tail = chain.run("inc", (), 1).unwrap().expect("downstream suspended");
        assert!(log.lock().is_empty());

        tail.await.unwrap();
        assert_eq!(*log.lock(), vec!["mw3:inc:1"]);
    }

    #[tokio::test]
    async fn awaited_downstream_runs_once() {
        let log: Log = Arc::default();
        let chain = runner(
            MiddlewareChain::<i32>::new()
                .with(Middleware::manual(|_, _, _, proceed| {
                    let downstream = proceed.run()?;
                    Ok(Step::pending(downstream.settle()))
                }))
                .with(Middleware::auto(|_, _, _| {
                    Ok(Step::pending(async { Ok::<(), BoxError>(()) }))
                }))
                .with(recorder(&log, "mw3")),
        );

        let tail = chain.run("inc", (), 1).unwrap().expect("downstream suspended");
        tail.await.unwrap();
        assert_eq!(*log.lock(), vec!["mw3:inc:1"]);
    }

    #[tokio::test]
    async fn dropped_downstream_error_still_surfaces() {
        let chain = runner(
            MiddlewareChain::<i32>::new()
                .with(Middleware::manual(|_, _, _, proceed| {
                    let _downstream = proceed.run()?;
                    Ok(Step::pending(async { Ok::<(), BoxError>(()) }))
                }))
                .with(Middleware::auto(|_, _, _| {
                    Ok(Step::pending(async { Err::<(), _>("late") }))
                })),
        );

        let tail = chain.run("inc", (), 1).unwrap().expect("first step suspended");
        let err = tail.await.unwrap_err();
        assert_eq!(err.to_string(), "late");
    }

    #[test]
    fn empty_chain_is_normalized_away() {
        let bundle = MiddlewareChain::<i32>::new().apply(Reducers::new());
        assert!(!bundle.has_middleware());

        let bundle = apply_middleware(vec![Middleware::<i32>::auto(|_, _, _| Ok(Step::Done))])(
            Reducers::new(),
        );
        assert!(bundle.has_middleware());
        assert_eq!(bundle.middleware.as_ref().map(ChainRunner::len), Some(1));
    }

    #[test]
    fn reducers_convert_into_bundle() {
        let bundle: Bundle<i32> = Reducers::new().add("inc", |s: &i32, _: &()| s + 1).into();
        assert!(!bundle.has_middleware());
        assert!(bundle.reducers().contains("inc"));
    }

    #[test]
    fn step_debug_and_kind() {
        assert_eq!(format!("{:?}", Step::Done), "Done");
        assert!(Step::pending(async { Ok::<(), BoxError>(()) }).is_pending());
        assert!(Middleware::<i32>::manual(|_, _, _, p| p.run()).is_manual());
    }
}
