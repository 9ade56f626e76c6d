//! The envelope and system-message taxonomy multiplexed onto a proc's
//! mailbox alongside ordinary user messages.

use std::any::Any;
use std::fmt;

use crate::proc_id::ProcId;

/// A user message body. Procs are untyped at the mailbox level — each
/// proc's own body is responsible for downcasting to whatever shape it
/// expects, the same contract `std::any::Any` trait objects always carry.
pub type Message = Box<dyn Any + Send>;

/// Everything that can sit in a proc's mailbox: either a message a user
/// sent, or a system message the runtime itself generated (link setup,
/// teardown, or propagated exit).
pub enum Envelope {
    User(Message),
    System(SystemMessage),
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::User(_) => f.write_str("Envelope::User(..)"),
            Envelope::System(sys) => f.debug_tuple("Envelope::System").field(sys).finish(),
        }
    }
}

/// A message the runtime itself generates to implement the link protocol.
/// Transparent to ordinary `receive` calls: the receive engine intercepts
/// and applies these before a user's predicate ever sees the envelope.
#[derive(Debug, Clone)]
pub enum SystemMessage {
    /// Sent to `target` to ask it to add `from` to its link set.
    Link(ProcId),
    /// Sent to `target` to ask it to remove `from` from its link set.
    Unlink(ProcId),
    /// Sent to every linked proc when `from` terminates abnormally.
    /// Carries the human-readable reason for the uncaught-exception sink
    /// and for a linked proc's own exit propagation.
    LinkExit { from: ProcId, reason: String },
}
