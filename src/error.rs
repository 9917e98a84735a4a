//! Error types returned by the broadcaster.
//!
//! - [`EffectError`]: why a single effect did not match
//! - [`WaitError`]: every effect failure of one `wait_for_effects` call
//! - [`BroadcastError`]: publishing into a stopped broadcaster

use thiserror::Error;

/// Error produced by an effect's own predicate.
pub type PredicateError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal failure of a single effect.
#[derive(Debug, Error)]
pub enum EffectError {
    /// The predicate returned an error; displayed verbatim.
    #[error("{0}")]
    Predicate(PredicateError),

    /// No delivered value matched before the deadline.
    #[error("{message}")]
    Timeout { message: String },
}

impl EffectError {
    /// Whether this failure is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EffectError::Timeout { .. })
    }
}

/// Aggregate of the effect failures of one `wait_for_effects` call.
///
/// Displays the member errors one per line, in the order the effects
/// were passed. Never empty: a call without failures returns `Ok(())`.
#[derive(Debug, Error)]
#[error("{}", join_messages(.errors))]
pub struct WaitError {
    errors: Vec<EffectError>,
}

impl WaitError {
    /// Build an aggregate; `None` when there is nothing to report.
    pub(crate) fn from_errors(errors: Vec<EffectError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    /// The individual effect failures.
    pub fn errors(&self) -> &[EffectError] {
        &self.errors
    }

    /// Number of failed effects.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether the aggregate holds no failures.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consume the aggregate, returning its members.
    pub fn into_errors(self) -> Vec<EffectError> {
        self.errors
    }
}

fn join_messages(errors: &[EffectError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Error returned when publishing fails.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastError {
    /// The serializer task has stopped.
    #[error("broadcaster is shut down")]
    Closed,
}
