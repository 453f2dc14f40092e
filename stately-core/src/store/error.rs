use thiserror::Error;

/// Error type accepted from update functions and middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures surfaced by [`Store::dispatch`](super::Store::dispatch) and by
/// awaiting a [`Dispatched`](super::Dispatched) chain.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The name is not in the store's reducer map. Nothing changed.
    #[error("no such update: `{0}`")]
    UnknownUpdate(String),

    /// The update function failed. State is unchanged and nobody was notified.
    #[error("update `{name}` failed")]
    Update {
        name: String,
        #[source]
        source: BoxError,
    },

    /// A middleware failed. The new state had already been applied.
    #[error("middleware failed while handling `{event}`")]
    Middleware {
        event: String,
        #[source]
        source: BoxError,
    },

    /// A middleware suspended but there was no tokio runtime to drive the rest
    /// of the chain. The new state had already been applied.
    #[error("middleware for `{event}` suspended outside of a tokio runtime")]
    NoRuntime { event: String },

    /// The task driving a suspended chain was aborted before it settled.
    #[error("middleware chain for `{event}` was cancelled")]
    Cancelled { event: String },
}

impl StoreError {
    /// Whether the store's state was left untouched by the failed call.
    pub fn state_unchanged(&self) -> bool {
        matches!(self, Self::UnknownUpdate(_) | Self::Update { .. })
    }
}
