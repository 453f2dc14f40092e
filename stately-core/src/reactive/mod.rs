//! Reactive Primitives
//!
//! This module implements the reactive cell that stores are built on.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. Listeners registered with
//! `subscribe` are called synchronously, in registration order, every time the
//! value is `set`.
//!
//! ## Derived cells
//!
//! `Signal::map` produces a read-only [`Derived`] cell whose value is a
//! function of its source. It is pushed a new value on every source `set`;
//! there is no lazy recomputation and no dependency tracking.
//!
//! ## Subscriptions
//!
//! Every `subscribe` returns a [`Subscription`]. Disposing it removes that one
//! registration; disposing again is a no-op.

mod signal;
mod subscriber;

pub use signal::{Derived, Signal};
pub use subscriber::{SubscriberId, Subscription};

pub(crate) use subscriber::ListenerList;
