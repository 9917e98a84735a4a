//! Listener registry infrastructure.
//!
//! Provides:
//! - Single-slot mailboxes with blocking hand-off delivery
//! - Arena-backed doubly-linked registry of listener nodes

pub mod list;
pub mod mailbox;

pub use list::{ListenerRegistry, NodeId};
pub use mailbox::{Mailbox, MAILBOX_SLOTS};
