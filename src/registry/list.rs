//! Arena-backed doubly-linked list of listener nodes.
//!
//! Nodes live in a `Vec` of slots and link to each other through
//! [`NodeId`] handles instead of pointers. Every slot carries a
//! generation that is bumped when the slot is freed, so a handle to a
//! removed node can never reach the node that later reuses its slot.
//!
//! All operations are O(1) except iteration.

use std::fmt;

use super::mailbox::{mailbox, Mailbox, MailboxSender};

/// Stable handle to a registered listener node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: usize,
    generation: u64,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Node<T> {
    sender: MailboxSender<T>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    /// `None` marks a freed slot.
    node: Option<Node<T>>,
}

/// Registry of listener mailboxes in registration order.
#[derive(Debug)]
pub struct ListenerRegistry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListenerRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Append a new node at the tail.
    ///
    /// Returns the node's handle and the receiving half of its mailbox.
    pub fn add(&mut self) -> (NodeId, Mailbox<T>) {
        let (sender, mailbox) = mailbox();
        let node = Node {
            sender,
            prev: self.tail,
            next: None,
        };

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };

        match self.tail.and_then(|tail| self.node_mut(tail)) {
            Some(tail) => tail.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;

        (id, mailbox)
    }

    /// Unlink a node and close its mailbox.
    ///
    /// Returns false if the handle is stale (already removed).
    pub fn remove(&mut self, id: NodeId) -> bool {
        let Some(node) = self.slot_mut(id).and_then(|slot| slot.node.take()) else {
            return false;
        };

        let slot = &mut self.slots[id.index];
        slot.generation += 1;
        self.free.push(id.index);

        match node.prev.and_then(|prev| self.node_mut(prev)) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|next| self.node_mut(next)) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }
        self.len -= 1;

        // Dropping the node drops the sender, which closes the mailbox.
        drop(node);
        true
    }

    /// First node, if any.
    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    /// Last node, if any.
    pub fn tail(&self) -> Option<NodeId> {
        self.tail
    }

    /// Node after `id`; `None` past the tail or for a stale handle.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.next)
    }

    /// Node before `id`; `None` before the head or for a stale handle.
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.prev)
    }

    /// Whether `id` refers to a registered node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Iterate node handles from head to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            registry: self,
            cursor: self.head,
        }
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no node is registered.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn sender(&self, id: NodeId) -> Option<&MailboxSender<T>> {
        self.node(id).map(|node| &node.sender)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
    }

    fn node(&self, id: NodeId) -> Option<&Node<T>> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        self.slot_mut(id).and_then(|slot| slot.node.as_mut())
    }
}

/// Forward iterator over a [`ListenerRegistry`].
pub struct Iter<'a, T> {
    registry: &'a ListenerRegistry<T>,
    cursor: Option<NodeId>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = self.registry.next(current);
        Some(current)
    }
}
