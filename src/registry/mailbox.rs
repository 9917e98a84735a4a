//! Single-slot mailboxes connecting the serializer to one listener.
//!
//! Delivery policy:
//! - Every mailbox holds at most [`MAILBOX_SLOTS`] undelivered value
//! - Delivering into a full mailbox suspends the serializer until the owner receives
//! - A listener that stops receiving therefore stalls every listener behind it
//!   and every later publish on the same broadcaster
//!
//! The coupling is what keeps delivery order identical across listeners.

use tokio::sync::mpsc;

/// Number of undelivered values a mailbox can hold.
pub const MAILBOX_SLOTS: usize = 1;

/// Create a connected sender/mailbox pair.
pub(crate) fn mailbox<T>() -> (MailboxSender<T>, Mailbox<T>) {
    let (tx, rx) = mpsc::channel(MAILBOX_SLOTS);
    (MailboxSender { tx }, Mailbox { rx })
}

/// Receiving half of a mailbox, owned by the listener.
///
/// The mailbox closes when its node is removed from the registry.
#[derive(Debug)]
pub struct Mailbox<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Mailbox<T> {
    /// Wait for the next delivered value.
    ///
    /// Returns `None` once the mailbox is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take a pending value without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Sending half of a mailbox, owned by the registry node.
#[derive(Debug)]
pub(crate) struct MailboxSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> MailboxSender<T> {
    /// Hand a value to the listener, waiting while its slot is full.
    ///
    /// Returns false if the listener has dropped its mailbox.
    pub(crate) async fn deliver(&self, value: T) -> bool {
        self.tx.send(value).await.is_ok()
    }

    /// Whether the listener side is gone.
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_deliver_and_receive() {
        let (sender, mut mailbox) = mailbox::<i32>();

        assert!(sender.deliver(7).await);
        assert_eq!(mailbox.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_second_delivery_waits_for_free_slot() {
        let (sender, mut mailbox) = mailbox::<i32>();
        assert!(sender.deliver(1).await);

        let mut second = task::spawn(sender.deliver(2));
        assert_pending!(second.poll());

        // Freeing the slot wakes the blocked delivery
        assert_eq!(mailbox.try_recv(), Some(1));
        assert!(second.is_woken());
        assert!(assert_ready!(second.poll()));
        assert_eq!(mailbox.try_recv(), Some(2));
    }

    #[tokio::test]
    async fn test_dropping_sender_closes_mailbox() {
        let (sender, mut mailbox) = mailbox::<i32>();
        assert!(sender.deliver(3).await);
        drop(sender);

        // Pending value is still drained before closure is observed
        assert_eq!(mailbox.recv().await, Some(3));
        assert_eq!(mailbox.recv().await, None);
    }

    #[tokio::test]
    async fn test_deliver_to_dropped_mailbox() {
        let (sender, mailbox) = mailbox::<i32>();
        drop(mailbox);

        assert!(sender.is_closed());
        assert!(!sender.deliver(4).await);
    }
}
