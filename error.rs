//! Error taxonomy shared across the signal barrier, mailbox, and proc layers.
//!
//! `InvalidArgument` and `Interrupted` are synchronous, recoverable failures
//! a caller can match on; `UserError` is whatever a proc's own body raised,
//! boxed so the core doesn't need to know anything about it beyond
//! `std::error::Error`.

use std::fmt;
use std::sync::Arc;

/// Errors surfaced synchronously by [`crate::signal::SignalBarrier`] and
/// [`crate::mailbox::Mailbox`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A second thread tried to wait on a [`crate::signal::SignalBarrier`]
    /// that already has a waiter, or some other precondition a caller
    /// controls was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A blocking mailbox wait observed the owning proc's interrupt flag.
    #[error("interrupted while waiting for a message")]
    Interrupted,
}

impl Error {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}

/// The outcome of a proc's main body, returned to the runtime via `?`.
///
/// Distinct from [`Error`]: a proc body reports either an [`Error`] it
/// failed to handle (most commonly [`Error::Interrupted`], propagated up
/// from a `receive` call) or an arbitrary user error boxed behind
/// [`std::error::Error`]. Both are "abnormal" terminations; see
/// [`crate::proc::ExitReason`].
#[derive(Debug, thiserror::Error)]
pub enum ProcError {
    /// Propagated from an interrupted mailbox wait, or from a `LinkExit`
    /// system message that asked this proc to terminate.
    #[error("interrupted")]
    Interrupted,

    /// Anything the proc's own body raised, wrapped opaquely.
    #[error(transparent)]
    User(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProcError {
    /// Convenience constructor for a user error from any `Display`able value,
    /// for bodies that don't already have a `std::error::Error` to hand.
    pub fn user(msg: impl fmt::Display) -> ProcError {
        ProcError::User(msg.to_string().into())
    }
}

impl From<Error> for ProcError {
    fn from(e: Error) -> ProcError {
        match e {
            Error::Interrupted => ProcError::Interrupted,
            Error::InvalidArgument(msg) => ProcError::user(msg),
        }
    }
}

/// An error a proc raised that nobody caught, recorded by [`crate::node::Node`].
///
/// `error` is `Arc`-wrapped (rather than `Box`) so that
/// [`crate::node::Node::uncaught_exceptions`] can hand out a cheap clone of
/// its sink instead of draining it on every call.
#[derive(Debug, Clone)]
pub struct UncaughtError {
    pub proc: crate::proc_id::ProcId,
    pub error: Arc<dyn std::error::Error + Send + Sync>,
}

impl fmt::Display for UncaughtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.proc, self.error)
    }
}
