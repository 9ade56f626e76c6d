//! `ProcId`: an opaque, cloneable handle to a proc, usable from any thread.
//!
//! Mirrors an Erlang pid: it carries no payload beyond enough to route a
//! message to its target and to compare/hash/print itself, and stays valid
//! (usable, comparable) after its proc has terminated — sending to a dead
//! proc is simply a no-op, never an error, the same contract Erlang's `!`
//! operator has for a dead pid.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::node::Node;
use crate::system_message::Message;

/// An opaque handle identifying one proc on one [`Node`].
#[derive(Clone)]
pub struct ProcId {
    pub(crate) node: Arc<Node>,
    pub(crate) seq: u64,
}

impl ProcId {
    /// This proc's node-local sequence number, unique for the lifetime of
    /// its [`Node`] (never reused, even after the proc terminates).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The node this proc belongs to.
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Enqueue `msg` in this proc's mailbox. A no-op if the proc has
    /// already terminated — there is no way to observe the difference
    /// between "delivered, not yet read" and "dropped because the target
    /// is gone" — send is fire-and-forget.
    pub fn send(&self, msg: Message) {
        self.node.deliver_user(self.seq, msg);
    }
}

impl PartialEq for ProcId {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node) && self.seq == other.seq
    }
}

impl Eq for ProcId {}

impl Hash for ProcId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.node) as usize).hash(state);
        self.seq.hash(state);
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.node.name(), self.seq)
    }
}

impl fmt::Debug for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcId({})", self)
    }
}
