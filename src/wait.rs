//! The wait-for-effects protocol.
//!
//! ## Lifecycle
//! ```text
//! wait_for_effects(ctx, publish, effects)
//!   ├─► register one mailbox per effect (write lock, in order)
//!   ├─► spawn one listener task per effect into a JoinSet
//!   ├─► publish.await
//!   └─► join listeners until all are done, the deadline, or ctx
//!         └─► collect the progress table ──► Ok(()) or WaitError
//!
//! listener:
//!   WAITING ──value──► EVALUATING ──Ok(false)──► WAITING
//!      │                   ├─ Ok(true) ──► MATCHED
//!      │                   └─ Err(e)   ──► FAILED(e)
//!      └─deadline/ctx──► TIMED_OUT(message)
//!   then: remove own node (write lock), draining the mailbox while waiting
//! ```
//!
//! Registration happens before `publish` runs, so every value the publish
//! action broadcasts reaches every effect of the call.
//!
//! The call never waits past its deadline. Listeners record their state in a
//! per-call progress table as they go, so when the deadline (or `ctx`) ends
//! the call early:
//! - settled effects contribute their outcome, even if still deregistering
//! - effects still waiting contribute their timeout message
//! - effects still inside their predicate contribute nothing
//!
//! Remaining listeners are cancelled and detached; each still removes its
//! node once it is free to.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::broadcaster::{Broadcaster, SharedRegistry};
use crate::effect::Effect;
use crate::error::{EffectError, PredicateError, WaitError};
use crate::observability::metrics;
use crate::registry::{Mailbox, NodeId};

/// Terminal state of one listener.
#[derive(Debug)]
enum Outcome {
    Matched,
    Failed(PredicateError),
    TimedOut(EffectError),
}

impl Outcome {
    fn as_label(&self) -> &'static str {
        match self {
            Outcome::Matched => "matched",
            Outcome::Failed(_) => "failed",
            Outcome::TimedOut(_) => "timed_out",
        }
    }

    fn into_error(self) -> Option<EffectError> {
        match self {
            Outcome::Matched => None,
            Outcome::Failed(e) => Some(EffectError::Predicate(e)),
            Outcome::TimedOut(e) => Some(e),
        }
    }
}

/// Where one listener stands.
#[derive(Debug, Default)]
enum Progress {
    #[default]
    Waiting,
    Evaluating,
    Settled(Outcome),
}

/// Per-call progress table, indexed by effect.
///
/// Once the call has collected it the table is empty, and later updates
/// from detached listeners are dropped.
#[derive(Debug, Clone)]
struct Tally(Arc<Mutex<Vec<Progress>>>);

impl Tally {
    fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, Progress::default);
        Self(Arc::new(Mutex::new(slots)))
    }

    fn set(&self, index: usize, progress: Progress) {
        if let Some(slot) = self.lock().get_mut(index) {
            *slot = progress;
        }
    }

    fn take(&self) -> Vec<Progress> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Progress>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Broadcaster<T>
where
    T: Clone + Send + 'static,
{
    /// Register `effects`, run `publish`, and wait for every effect to settle.
    ///
    /// The wait ends when every effect has settled, at the broadcaster's
    /// timeout, or when `ctx` is cancelled, whichever comes first. Effects
    /// still waiting at that point report their timeout message; effects
    /// still evaluating a value report nothing. Returns `Ok(())` only if no
    /// effect reported an error.
    ///
    /// If the deadline or `ctx` fires before the listeners can even be
    /// registered, `publish` is not run and every effect reports its
    /// timeout message.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use herald::{Broadcaster, Effect};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let broadcaster = Broadcaster::new(Duration::from_millis(100));
    ///
    /// let result = broadcaster
    ///     .wait_for_effects(
    ///         &CancellationToken::new(),
    ///         async {
    ///             broadcaster.broadcast_one(42).await.unwrap();
    ///         },
    ///         [Effect::matching(|n: &i32| *n == 42, "never saw 42")],
    ///     )
    ///     .await;
    ///
    /// assert!(result.is_ok());
    /// # }
    /// ```
    #[tracing::instrument(skip_all, fields(effects = tracing::field::Empty))]
    pub async fn wait_for_effects<F, I>(
        &self,
        ctx: &CancellationToken,
        publish: F,
        effects: I,
    ) -> Result<(), WaitError>
    where
        F: Future<Output = ()>,
        I: IntoIterator<Item = Effect<T>>,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let scope = ctx.child_token();

        let effects: Vec<_> = effects.into_iter().collect();
        tracing::Span::current().record("effects", effects.len());
        let timeouts: Vec<EffectError> = effects.iter().map(Effect::timeout_error).collect();

        let registered = tokio::select! {
            biased;
            nodes = self.register(effects.len()) => Some(nodes),
            () = tokio::time::sleep_until(deadline) => None,
            () = scope.cancelled() => None,
        };
        let Some(nodes) = registered else {
            tracing::warn!("Wait ended before listeners could register, skipping publish");
            metrics::record_wait(started.elapsed().as_secs_f64(), timeouts.len());
            return into_result(timeouts);
        };

        let tally = Tally::new(effects.len());
        let mut listeners = ListenerGroup {
            tasks: JoinSet::new(),
            scope: scope.clone(),
        };
        for (index, (effect, (node, mailbox))) in effects.into_iter().zip(nodes).enumerate() {
            let listener = Listener {
                index,
                node,
                mailbox,
                effect,
                registry: Arc::clone(&self.registry),
                tally: tally.clone(),
                scope: scope.clone(),
                deadline,
            };
            listeners.tasks.spawn(listener.run());
        }

        publish.await;

        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);

        loop {
            tokio::select! {
                biased;
                joined = listeners.tasks.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        // Listeners catch predicate panics, so only runtime
                        // shutdown can land here.
                        tracing::warn!(error = %e, "Listener task did not complete");
                    }
                    None => break,
                },
                () = &mut expired => {
                    tracing::debug!(running = listeners.tasks.len(), "Deadline passed");
                    break;
                }
                () = scope.cancelled() => {
                    tracing::debug!(running = listeners.tasks.len(), "Wait cancelled");
                    break;
                }
            }
        }

        let errors = collect(tally.take(), timeouts);
        metrics::record_wait(started.elapsed().as_secs_f64(), errors.len());
        into_result(errors)
    }

    /// Register `count` listener nodes under a single write lock.
    async fn register(&self, count: usize) -> Vec<(NodeId, Mailbox<T>)> {
        let mut registry = self.registry.write().await;
        let nodes: Vec<_> = (0..count).map(|_| registry.add()).collect();
        metrics::record_listeners(registry.len());
        tracing::debug!(count, listeners = registry.len(), "Listeners registered");
        nodes
    }
}

/// Turn the final progress table into effect errors, in effect order.
fn collect(progress: Vec<Progress>, timeouts: Vec<EffectError>) -> Vec<EffectError> {
    progress
        .into_iter()
        .zip(timeouts)
        .enumerate()
        .filter_map(|(index, (progress, timeout))| {
            let (label, error) = match progress {
                Progress::Settled(outcome) => (outcome.as_label(), outcome.into_error()),
                Progress::Waiting => ("timed_out", Some(timeout)),
                Progress::Evaluating => ("in_flight", None),
            };
            tracing::debug!(index, outcome = label, "Effect collected");
            metrics::record_effect_outcome(label);
            error
        })
        .collect()
}

fn into_result(errors: Vec<EffectError>) -> Result<(), WaitError> {
    match WaitError::from_errors(errors) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Listener tasks of one call.
///
/// If the call ends before every listener is joined, the remaining
/// listeners are cancelled and detached instead of aborted, so each one
/// still removes its node from the registry.
struct ListenerGroup {
    tasks: JoinSet<()>,
    scope: CancellationToken,
}

impl Drop for ListenerGroup {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            self.scope.cancel();
            self.tasks.detach_all();
        }
    }
}

/// One effect's receive loop and the node it owns.
struct Listener<T> {
    index: usize,
    node: NodeId,
    mailbox: Mailbox<T>,
    effect: Effect<T>,
    registry: SharedRegistry<T>,
    tally: Tally,
    scope: CancellationToken,
    deadline: Instant,
}

impl<T> Listener<T>
where
    T: Send + 'static,
{
    async fn run(mut self) {
        let caught = AssertUnwindSafe(self.receive()).catch_unwind().await;
        let outcome = match caught {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(node = %self.node, %message, "Effect predicate panicked");
                Outcome::Failed(format!("effect predicate panicked: {message}").into())
            }
        };
        tracing::trace!(node = %self.node, outcome = outcome.as_label(), "Effect settled");
        // Recorded before deregistering, which may have to wait on a delivery pass
        self.tally.set(self.index, Progress::Settled(outcome));
        self.deregister().await;
    }

    async fn receive(&mut self) -> Outcome {
        let expired = tokio::time::sleep_until(self.deadline);
        tokio::pin!(expired);

        loop {
            tokio::select! {
                biased;
                delivered = self.mailbox.recv() => {
                    let Some(value) = delivered else {
                        return Outcome::TimedOut(self.effect.timeout_error());
                    };
                    self.tally.set(self.index, Progress::Evaluating);
                    match self.effect.check(&value) {
                        Ok(true) => return Outcome::Matched,
                        Ok(false) => self.tally.set(self.index, Progress::Waiting),
                        Err(e) => return Outcome::Failed(e),
                    }
                }
                () = &mut expired => return Outcome::TimedOut(self.effect.timeout_error()),
                () = self.scope.cancelled() => return Outcome::TimedOut(self.effect.timeout_error()),
            }
        }
    }

    /// Unlink this listener's node, which also closes its mailbox.
    ///
    /// The serializer may be blocked delivering into this mailbox while
    /// holding the read lock, so keep draining until the write lock is ours.
    async fn deregister(&mut self) {
        let registry = Arc::clone(&self.registry);
        let write = registry.write();
        tokio::pin!(write);

        let mut registry = loop {
            tokio::select! {
                biased;
                guard = &mut write => break guard,
                Some(_) = self.mailbox.recv() => {
                    tracing::trace!(node = %self.node, "Discarding value delivered after settling");
                }
            }
        };

        registry.remove(self.node);
        metrics::record_listeners(registry.len());
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
