//! Reducer stores.
//!
//! A store wraps a [`Signal`](crate::reactive::Signal) with a fixed map of
//! named update functions, event-tagged listeners and an optional middleware
//! chain that observes every update after it has been applied.

mod error;
mod middleware;
mod reducer;
mod store;

pub use error::{BoxError, StoreError};
pub use middleware::{apply_middleware, Bundle, Flow, Middleware, MiddlewareChain, Proceed, Step};
pub use reducer::Reducers;
pub use store::{create_store, Action, Dispatched, Store};
