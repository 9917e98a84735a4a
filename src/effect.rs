//! Effects: the conditions a caller waits for.
//!
//! An [`Effect`] pairs a predicate over the broadcast payload with the
//! message reported if no payload satisfies it in time. Predicates
//! borrow each delivered value and may be called many times, possibly
//! concurrently with the predicates of other effects.

use std::fmt;
use std::sync::Arc;

use crate::error::{EffectError, PredicateError};

type Predicate<T> = dyn Fn(&T) -> Result<bool, PredicateError> + Send + Sync;

/// A condition to wait for on a broadcaster.
///
/// Cloning is cheap; the predicate is shared.
pub struct Effect<T> {
    predicate: Arc<Predicate<T>>,
    timeout_message: String,
}

impl<T> Effect<T> {
    /// Create an effect from a fallible predicate.
    ///
    /// The predicate returns `Ok(true)` on a match, `Ok(false)` to keep
    /// waiting, and `Err` to fail the effect immediately.
    ///
    /// # Example
    ///
    /// ```
    /// use herald::Effect;
    ///
    /// let effect = Effect::new(|n: &i32| Ok(*n == 42), "never saw 42");
    /// assert!(effect.check(&42).unwrap());
    /// assert_eq!(effect.timeout_message(), "never saw 42");
    /// ```
    pub fn new<F>(predicate: F, timeout_message: impl Into<String>) -> Self
    where
        F: Fn(&T) -> Result<bool, PredicateError> + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            timeout_message: timeout_message.into(),
        }
    }

    /// Create an effect from an infallible predicate.
    pub fn matching<F>(predicate: F, timeout_message: impl Into<String>) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::new(move |value: &T| Ok(predicate(value)), timeout_message)
    }

    /// Evaluate the predicate against a value.
    pub fn check(&self, value: &T) -> Result<bool, PredicateError> {
        (self.predicate)(value)
    }

    /// Message reported when the effect times out.
    pub fn timeout_message(&self) -> &str {
        &self.timeout_message
    }

    pub(crate) fn timeout_error(&self) -> EffectError {
        EffectError::Timeout {
            message: self.timeout_message.clone(),
        }
    }
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
            timeout_message: self.timeout_message.clone(),
        }
    }
}

impl<T> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("timeout_message", &self.timeout_message)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_wraps_bool_predicate() {
        let effect = Effect::matching(|n: &i32| *n > 10, "too small");

        assert!(!effect.check(&3).unwrap());
        assert!(effect.check(&11).unwrap());
    }

    #[test]
    fn test_predicate_error_is_returned() {
        let effect = Effect::new(
            |s: &String| s.parse::<u32>().map(|n| n == 7).map_err(Into::into),
            "no seven",
        );

        assert!(effect.check(&"7".to_string()).unwrap());
        assert!(effect.check(&"seven".to_string()).is_err());
    }

    #[test]
    fn test_timeout_error_carries_message() {
        let effect = Effect::matching(|_: &()| false, "gave up");
        assert_eq!(effect.timeout_error().to_string(), "gave up");
    }

    #[test]
    fn test_clone_shares_predicate() {
        let effect = Effect::matching(|n: &u8| *n == 1, "one");
        let copy = effect.clone();
        assert!(copy.check(&1).unwrap());
        assert_eq!(copy.timeout_message(), "one");
    }
}
