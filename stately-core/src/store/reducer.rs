//! Named update functions.

use std::fmt::Debug;
use std::sync::Arc;

use indexmap::IndexMap;

use super::error::BoxError;

pub(crate) type ReducerFn<S, A> = Arc<dyn Fn(&S, &A) -> Result<S, BoxError> + Send + Sync>;

/// Insertion-ordered map from update name to update function.
///
/// # Example
///
/// ```rust
/// use stately_core::Reducers;
///
/// let reducers = Reducers::<i32, i32>::new()
///     .add("inc", |state, step| state + step)
///     .try_add("checked_dec", |state, step| {
///         if state < step {
///             Err("would go negative")
///         } else {
///             Ok(state - step)
///         }
///     });
///
/// assert_eq!(reducers.names().collect::<Vec<_>>(), ["inc", "checked_dec"]);
/// ```
pub struct Reducers<S, A = ()> {
    map: IndexMap<String, ReducerFn<S, A>>,
}

impl<S, A> Reducers<S, A>
where
    S: 'static,
    A: 'static,
{
    pub fn new() -> Self {
        Self {
            map: IndexMap::new(),
        }
    }

    /// Register an update function that cannot fail.
    ///
    /// Re-using a name replaces the earlier function in place.
    pub fn add<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&S, &A) -> S + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(move |state: &S, args: &A| -> Result<S, BoxError> {
            Ok(f(state, args))
        }))
    }

    /// Register an update function that may reject the update.
    pub fn try_add<F, E>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&S, &A) -> Result<S, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.insert(
            name.into(),
            Arc::new(move |state: &S, args: &A| -> Result<S, BoxError> {
                f(state, args).map_err(Into::into)
            }),
        )
    }

    fn insert(mut self, name: String, f: ReducerFn<S, A>) -> Self {
        self.map.insert(name, f);
        self
    }

    pub(crate) fn get(&self, name: &str) -> Option<&ReducerFn<S, A>> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Update names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<S: 'static, A: 'static> Default for Reducers<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A> Debug for Reducers<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.map.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_apply() {
        let reducers = Reducers::<i32, i32>::new().add("inc", |s, step| s + step);
        let inc = reducers.get("inc").expect("inc registered");
        assert_eq!(inc(&1, &2).unwrap(), 3);
        assert!(reducers.get("dec").is_none());
    }

    #[test]
    fn try_add_maps_error() {
        let reducers = Reducers::<i32>::new().try_add("boom", |_, _| Err::<i32, _>("explode"));
        let boom = reducers.get("boom").expect("boom registered");
        let err = boom(&0, &()).unwrap_err();
        assert_eq!(err.to_string(), "explode");
    }

    #[test]
    fn replacing_keeps_position() {
        let reducers = Reducers::<i32>::new()
            .add("a", |s, _| *s)
            .add("b", |s, _| *s)
            .add("a", |s, _| s + 10);

        assert_eq!(reducers.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(reducers.len(), 2);
        assert_eq!(reducers.get("a").unwrap()(&1, &()).unwrap(), 11);
    }

    #[test]
    fn empty_map() {
        let reducers = Reducers::<i32>::default();
        assert!(reducers.is_empty());
        assert!(!reducers.contains("anything"));
    }
}
