//! Broadcaster and its serializer task.
//!
//! ## Architecture
//! ```text
//! broadcast(v) ──► [ingress] ──► serializer ──► registry (read lock)
//!   (waits for                     (one task)     ├─► mailbox 1
//!    acceptance)                                  ├─► mailbox 2
//!                                                 └─► mailbox N
//! ```
//!
//! ## Rules
//! - **Serialized**: one serializer per broadcaster, so every listener sees
//!   values in publish order
//! - **Rendezvous publish**: `broadcast` returns once the serializer has
//!   accepted the value, not when it has been delivered
//! - **Blocking hand-off**: delivery waits on full mailboxes (see
//!   [`MAILBOX_SLOTS`](crate::registry::MAILBOX_SLOTS))
//! - **Owned task**: the serializer stops on [`Broadcaster::shutdown`] or
//!   when the broadcaster is dropped

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BroadcasterConfig;
use crate::error::BroadcastError;
use crate::observability::metrics;
use crate::registry::ListenerRegistry;

/// A published value plus the acknowledgement the publisher waits on.
struct Envelope<T> {
    value: T,
    accepted: oneshot::Sender<()>,
}

/// Registry shared between the serializer and waiting effects.
pub(crate) type SharedRegistry<T> = Arc<RwLock<ListenerRegistry<T>>>;

/// In-process broadcaster for one payload type.
///
/// Must be created inside a tokio runtime. Share it behind an `Arc` if
/// several tasks publish or wait on it.
pub struct Broadcaster<T> {
    ingress: mpsc::Sender<Envelope<T>>,
    pub(crate) registry: SharedRegistry<T>,
    pub(crate) timeout: Duration,
    cancel: CancellationToken,
    serializer: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Broadcaster<T>
where
    T: Clone + Send + 'static,
{
    /// Create a broadcaster and start its serializer.
    ///
    /// `timeout` bounds every [`wait_for_effects`](Self::wait_for_effects) call.
    pub fn new(timeout: Duration) -> Self {
        Self::with_config(BroadcasterConfig { timeout })
    }

    /// Create a broadcaster from a [`BroadcasterConfig`].
    pub fn with_config(config: BroadcasterConfig) -> Self {
        let (ingress, rx) = mpsc::channel(1);
        let registry: SharedRegistry<T> = Arc::new(RwLock::new(ListenerRegistry::new()));
        let cancel = CancellationToken::new();

        let serializer = tokio::spawn(run_serializer(
            rx,
            Arc::clone(&registry),
            cancel.clone(),
        ));

        tracing::debug!(timeout = ?config.timeout, "Broadcaster started");

        Self {
            ingress,
            registry,
            timeout: config.timeout,
            cancel,
            serializer: Mutex::new(Some(serializer)),
        }
    }

    /// Publish values in order.
    ///
    /// Each value waits until the serializer accepts it, which in turn
    /// waits until the previous value reached every listener.
    #[tracing::instrument(skip_all)]
    pub async fn broadcast<I>(&self, values: I) -> Result<(), BroadcastError>
    where
        I: IntoIterator<Item = T>,
    {
        for value in values {
            let (accepted, ack) = oneshot::channel();
            self.ingress
                .send(Envelope { value, accepted })
                .await
                .map_err(|_| BroadcastError::Closed)?;
            ack.await.map_err(|_| BroadcastError::Closed)?;
            metrics::record_broadcast();
        }
        Ok(())
    }

    /// Publish a single value.
    pub async fn broadcast_one(&self, value: T) -> Result<(), BroadcastError> {
        self.broadcast(std::iter::once(value)).await
    }
}

impl<T> Broadcaster<T> {
    /// Timeout applied to each wait.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of listeners currently registered.
    pub async fn listener_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Whether the serializer has been told to stop.
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the serializer and wait for it to exit.
    ///
    /// Later broadcasts fail with [`BroadcastError::Closed`]. Calling this
    /// more than once is harmless.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handle = match self.serializer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Serializer task ended abnormally");
            }
        }
    }
}

impl<T> Drop for Broadcaster<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Serializer loop: take each published value and fan it out.
async fn run_serializer<T>(
    mut ingress: mpsc::Receiver<Envelope<T>>,
    registry: SharedRegistry<T>,
    cancel: CancellationToken,
) where
    T: Clone + Send + 'static,
{
    loop {
        let envelope = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = ingress.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let Envelope { value, accepted } = envelope;
        // The publisher may have gone away; delivery still proceeds.
        let _ = accepted.send(());

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            delivered = deliver(&registry, value) => {
                tracing::trace!(delivered, "Value delivered");
            }
        }
    }

    tracing::debug!("Serializer stopped");
}

/// Deliver one value to every registered mailbox, head to tail.
///
/// Holds the read lock for the whole pass so no node is unlinked or
/// closed while a delivery to it is in flight.
async fn deliver<T: Clone>(registry: &RwLock<ListenerRegistry<T>>, value: T) -> usize {
    let registry = registry.read().await;
    let mut delivered = 0;

    for node in registry.iter() {
        let Some(sender) = registry.sender(node) else {
            continue;
        };
        if sender.is_closed() {
            continue;
        }
        if sender.deliver(value.clone()).await {
            delivered += 1;
        } else {
            tracing::trace!(%node, "Listener dropped its mailbox, skipping");
        }
    }

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[tokio::test]
    async fn test_broadcast_without_listeners() {
        let broadcaster = Broadcaster::<u32>::new(Duration::from_millis(50));

        broadcaster.broadcast([1, 2, 3]).await.unwrap();

        assert_eq!(broadcaster.listener_count().await, 0);
    }

    #[tokio::test]
    async fn test_values_reach_all_listeners_in_order() {
        let broadcaster = Broadcaster::<u32>::new(Duration::from_millis(50));
        let (_, mut first) = broadcaster.registry.write().await.add();
        let (_, mut second) = broadcaster.registry.write().await.add();

        broadcaster.broadcast_one(1).await.unwrap();
        assert_eq!(first.recv().await, Some(1));
        assert_eq!(second.recv().await, Some(1));

        broadcaster.broadcast_one(2).await.unwrap();
        assert_eq!(first.recv().await, Some(2));
        assert_eq!(second.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_full_mailbox_stalls_later_publish() {
        let broadcaster = Broadcaster::<u32>::new(Duration::from_millis(50));
        let (_, mut mailbox) = broadcaster.registry.write().await.add();

        // Fills the slot
        broadcaster.broadcast_one(1).await.unwrap();
        // Accepted, then stuck delivering into the full slot
        broadcaster.broadcast_one(2).await.unwrap();

        let mut third = task::spawn(broadcaster.broadcast_one(3));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_pending!(third.poll());

        assert_eq!(mailbox.recv().await, Some(1));
        assert_eq!(mailbox.recv().await, Some(2));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_ready_ok!(third.poll());
        assert_eq!(mailbox.recv().await, Some(3));
    }

    #[tokio::test]
    async fn test_broadcast_after_shutdown_is_closed() {
        let broadcaster = Broadcaster::<u32>::new(Duration::from_millis(50));

        broadcaster.shutdown().await;
        broadcaster.shutdown().await;

        assert!(broadcaster.is_shut_down());
        assert_eq!(
            broadcaster.broadcast_one(7).await,
            Err(BroadcastError::Closed)
        );
    }

    #[tokio::test]
    async fn test_dropped_listener_does_not_stall_delivery() {
        let broadcaster = Broadcaster::<u32>::new(Duration::from_millis(50));
        let (_, gone) = broadcaster.registry.write().await.add();
        let (_, mut alive) = broadcaster.registry.write().await.add();
        drop(gone);

        broadcaster.broadcast([1, 2]).await.unwrap();

        assert_eq!(alive.recv().await, Some(1));
        assert_eq!(alive.recv().await, Some(2));
    }
}
