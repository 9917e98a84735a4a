//! Test utilities shared by Herald integration tests.
//!
//! Provides:
//! - Broadcaster fixture with tracing initialized
//! - Effect helpers for id-matching predicates
//! - Polling helper for asynchronous conditions

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use herald::observability::tracing::init_test_tracing;
use herald::{Broadcaster, Effect};
use uuid::Uuid;

/// Timeout message used by most test effects.
pub const TIMEOUT_MSG: &str = "Timed out waiting for message";

/// Create a broadcaster with tracing set up for tests.
pub fn broadcaster<T>(timeout_ms: u64) -> Broadcaster<T>
where
    T: Clone + Send + 'static,
{
    init_test_tracing();
    Broadcaster::new(Duration::from_millis(timeout_ms))
}

/// Effect that matches exactly `id`.
pub fn effect_for(id: Uuid) -> Effect<Uuid> {
    Effect::matching(move |msg: &Uuid| *msg == id, TIMEOUT_MSG)
}

/// Wait for an asynchronous condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
