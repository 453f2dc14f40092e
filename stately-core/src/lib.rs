//! Stately Core
//!
//! Observable state for reactive views. This crate provides:
//!
//! - [`Signal`]: a single mutable value with synchronous, ordered listeners
//!   and read-only [`Derived`] cells built with `map`
//! - [`Store`]: a signal driven by named update functions, with its own
//!   listener list that also receives the update name and arguments
//! - [`Middleware`]: an ordered chain that observes each update once it has
//!   been applied, with explicit or automatic continuation
//!
//! # Architecture
//!
//! - `reactive`: signals, derived cells and subscriptions
//! - `store`: reducers, the store itself and the middleware chain
//!
//! # Example
//!
//! ```rust
//! use stately_core::{create_store, Reducers};
//!
//! let store = create_store(
//!     Vec::<String>::new(),
//!     Reducers::<Vec<String>, String>::new()
//!         .add("push", |items, item| {
//!             let mut items = items.clone();
//!             items.push(item.clone());
//!             items
//!         }),
//! );
//!
//! let count = store.state().map(|items| items.len());
//!
//! store.dispatch("push", "milk".to_string()).unwrap();
//! store.dispatch("push", "eggs".to_string()).unwrap();
//!
//! assert_eq!(count.get(), 2);
//! ```

pub mod reactive;
pub mod store;

pub use reactive::{Derived, Signal, SubscriberId, Subscription};
pub use store::{
    apply_middleware, create_store, Action, BoxError, Bundle, Dispatched, Flow, Middleware,
    MiddlewareChain, Proceed, Reducers, Step, Store, StoreError,
};
