//! Herald: an in-process broadcaster for waiting on predicate-matched effects.
//!
//! A [`Broadcaster`] fans every published value out to a set of transient
//! listeners. [`Broadcaster::wait_for_effects`] registers one listener per
//! [`Effect`], runs a publish action, and waits until each effect's
//! predicate matches, fails, or times out, collecting failures into one
//! [`WaitError`].
//!
//! # Architecture
//!
//! - **Serialized fan-out**: a single serializer task delivers each value to
//!   every listener, in registration order
//! - **Register before publish**: listeners exist before the publish action
//!   runs, so nothing it broadcasts can be missed
//! - **Single-slot mailboxes**: a listener that stops reading stalls delivery
//! - **Scoped listeners**: every listener task is joined before the call returns
//!
//! # Modules
//!
//! - [`broadcaster`]: Broadcaster and serializer task
//! - [`config`]: Library and CLI configuration
//! - [`effect`]: Wait conditions
//! - [`error`]: Effect, aggregate and broadcast errors
//! - [`observability`]: Tracing and metrics setup
//! - [`registry`]: Listener registry and mailboxes

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // registry::ListenerRegistry is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc       // Panic docs can be verbose
)]

pub mod broadcaster;
pub mod config;
pub mod effect;
pub mod error;
pub mod observability;
pub mod registry;
mod wait;

pub use broadcaster::Broadcaster;
pub use config::BroadcasterConfig;
pub use effect::Effect;
pub use error::{BroadcastError, EffectError, PredicateError, WaitError};
