//! Proc lifecycle: the context handed to a running proc's body, the exit
//! taxonomy, and the panic-based exit protocol.
//!
//! The thread-entry function stays small and pushes the actual work into
//! a closure the caller supplies; `exit`'s panic-as-control-flow trick is
//! a standard Rust idiom for "unwind out of arbitrary depth without every
//! frame propagating a `Result`", the same family of technique crates use
//! `resume_unwind` for elsewhere.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crate::error::ProcError;
use crate::mailbox::Mailbox;
use crate::proc_id::ProcId;
use crate::system_message::{Envelope, Message, SystemMessage};

/// Why a proc terminated.
///
/// Only `Interrupted` and `UserError` are "abnormal" — they notify every
/// proc still linked to this one, and for `UserError` specifically, get
/// recorded in the owning [`crate::node::Node`]'s uncaught-exception
/// sink. `Normal` propagates to nobody: a clean exit is invisible to
/// links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Normal,
    Interrupted,
    UserError(String),
}

impl ExitReason {
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, ExitReason::Normal)
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Normal => f.write_str("normal"),
            ExitReason::Interrupted => f.write_str("interrupted"),
            ExitReason::UserError(msg) => f.write_str(msg),
        }
    }
}

/// Panic payload used by [`ProcContext::exit`]. Caught in [`run_body`] and
/// translated back into an [`ExitReason`] instead of being treated as an
/// uncaught user error.
pub(crate) struct ExitSignal(pub ExitReason);

/// The value passed to a proc's body: its own identity, its mailbox
/// (wrapped behind the `receive*` methods below), and its link set.
///
/// Kept as an explicit parameter rather than thread-local/global state —
/// the free-function "current proc" layer some actor libraries expose is
/// explicitly out of scope.
pub struct ProcContext {
    id: ProcId,
    mailbox: Mailbox<Envelope>,
    links: HashSet<ProcId>,
}

impl ProcContext {
    pub(crate) fn new(id: ProcId, mailbox: Mailbox<Envelope>) -> ProcContext {
        ProcContext {
            id,
            mailbox,
            links: HashSet::new(),
        }
    }

    pub fn id(&self) -> &ProcId {
        &self.id
    }

    /// The node this proc is registered on.
    pub fn node(&self) -> &std::sync::Arc<crate::node::Node> {
        self.id.node()
    }

    /// Link this proc with `other`: if either exits abnormally afterwards,
    /// the other receives a `LinkExit`. Linking to oneself is a no-op.
    pub fn link(&mut self, other: &ProcId) {
        if *other == self.id {
            return;
        }
        self.links.insert(other.clone());
        other
            .node()
            .deliver_system(other.seq(), SystemMessage::Link(self.id.clone()));
    }

    /// Undo a previous [`ProcContext::link`] in both directions.
    pub fn unlink(&mut self, other: &ProcId) {
        self.links.remove(other);
        other
            .node()
            .deliver_system(other.seq(), SystemMessage::Unlink(self.id.clone()));
    }

    /// Terminate this proc right now with `reason`, unwinding out of
    /// however many stack frames of the body are currently active.
    pub fn exit(&self, reason: ExitReason) -> ! {
        panic::panic_any(ExitSignal(reason))
    }

    /// Block for the next message in mailbox order (system messages are
    /// applied transparently and never reach `handler`), apply `handler`,
    /// and return its result.
    pub fn receive<T>(&mut self, handler: impl FnOnce(Message) -> T) -> Result<T, ProcError> {
        self.receive_where(|_| true, handler)
    }

    /// As [`ProcContext::receive`], but selects the first message (in
    /// mailbox order) for which `pred` returns true, leaving every other
    /// message in place in its original relative order.
    pub fn receive_where<T>(
        &mut self,
        pred: impl Fn(&Message) -> bool,
        handler: impl FnOnce(Message) -> T,
    ) -> Result<T, ProcError> {
        let mut handler = Some(handler);
        loop {
            let envelope = self
                .mailbox
                .take_match(|e| match e {
                    Envelope::System(_) => true,
                    Envelope::User(m) => pred(m),
                })
                .map_err(ProcError::from)?;
            match envelope {
                Envelope::System(sys) => {
                    if let Some(reason) = self.apply_system_message(sys) {
                        return Err(reason);
                    }
                }
                Envelope::User(msg) => {
                    let handler = handler.take().expect("resumed after returning");
                    return Ok(handler(msg));
                }
            }
        }
    }

    /// As [`ProcContext::receive`], bounded by `timeout`. `Ok(None)` if no
    /// matching message arrived before the deadline.
    pub fn receive_timeout<T>(
        &mut self,
        timeout: Duration,
        handler: impl FnOnce(Message) -> T,
    ) -> Result<Option<T>, ProcError> {
        self.receive_timeout_where(timeout, |_| true, handler)
    }

    /// As [`ProcContext::receive_where`], bounded by `timeout`.
    pub fn receive_timeout_where<T>(
        &mut self,
        timeout: Duration,
        pred: impl Fn(&Message) -> bool,
        handler: impl FnOnce(Message) -> T,
    ) -> Result<Option<T>, ProcError> {
        let mut handler = Some(handler);
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let found = self
                .mailbox
                .poll_match_timeout(
                    |e| match e {
                        Envelope::System(_) => true,
                        Envelope::User(m) => pred(m),
                    },
                    remaining,
                )
                .map_err(ProcError::from)?;
            match found {
                None => return Ok(None),
                Some(Envelope::System(sys)) => {
                    if let Some(reason) = self.apply_system_message(sys) {
                        return Err(reason);
                    }
                }
                Some(Envelope::User(msg)) => {
                    let handler = handler.take().expect("resumed after returning");
                    return Ok(Some(handler(msg)));
                }
            }
        }
    }

    /// As [`ProcContext::receive_timeout`], but runs `on_timeout` instead
    /// of returning `None` on expiry — the literal `receive(handler,
    /// timeout, onTimeout)` three-argument form.
    pub fn receive_timeout_or<T>(
        &mut self,
        timeout: Duration,
        handler: impl FnOnce(Message) -> T,
        on_timeout: impl FnOnce() -> T,
    ) -> Result<T, ProcError> {
        match self.receive_timeout(timeout, handler)? {
            Some(value) => Ok(value),
            None => Ok(on_timeout()),
        }
    }

    /// As [`ProcContext::receive_timeout_where`], but runs `on_timeout`
    /// instead of returning `None` on expiry.
    pub fn receive_timeout_where_or<T>(
        &mut self,
        timeout: Duration,
        pred: impl Fn(&Message) -> bool,
        handler: impl FnOnce(Message) -> T,
        on_timeout: impl FnOnce() -> T,
    ) -> Result<T, ProcError> {
        match self.receive_timeout_where(timeout, pred, handler)? {
            Some(value) => Ok(value),
            None => Ok(on_timeout()),
        }
    }

    fn apply_system_message(&mut self, sys: SystemMessage) -> Option<ProcError> {
        match sys {
            SystemMessage::Link(who) => {
                self.links.insert(who);
                None
            }
            SystemMessage::Unlink(who) => {
                self.links.remove(&who);
                None
            }
            SystemMessage::LinkExit { from, reason } => {
                self.links.remove(&from);
                log::debug!("{} saw linked proc {} exit: {}", self.id, from, reason);
                Some(ProcError::Interrupted)
            }
        }
    }

    pub(crate) fn links(&self) -> impl Iterator<Item = &ProcId> {
        self.links.iter()
    }
}

/// A class-like, stateful alternative to a bare closure body: implementors
/// hold their own state across `run` calls via `&mut self`, the way a
/// GenServer's callback module holds its own state across calls.
pub trait ProcBehavior: Send + 'static {
    fn run(&mut self, ctx: &mut ProcContext) -> Result<(), ProcError>;
}

/// Returned by a [`crate::node::Node::spawn_recursive`] step function: the
/// state to carry into the next iteration, or a request to stop.
pub enum RecursiveStep<S> {
    Continue(S),
    Stop,
}

/// The result of running a proc's body to completion, used by
/// [`crate::node::Node`] to update its registry and notify links.
pub(crate) struct ProcOutcome {
    pub id: ProcId,
    pub reason: ExitReason,
    pub links: Vec<ProcId>,
    pub error: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Run `body` to completion, translating panics (including the
/// [`ExitSignal`] a `ProcContext::exit` call raises) into an [`ExitReason`].
pub(crate) fn run_body(
    mut ctx: ProcContext,
    body: impl FnOnce(&mut ProcContext) -> Result<(), ProcError> + Send + 'static,
) -> ProcOutcome {
    let id = ctx.id.clone();
    let result = panic::catch_unwind(AssertUnwindSafe(|| body(&mut ctx)));
    let (reason, error) = match result {
        Ok(Ok(())) => (ExitReason::Normal, None),
        Ok(Err(ProcError::Interrupted)) => (ExitReason::Interrupted, None),
        Ok(Err(ProcError::User(e))) => {
            let msg = e.to_string();
            (ExitReason::UserError(msg), Some(e))
        }
        Err(payload) => match payload.downcast::<ExitSignal>() {
            Ok(boxed) => {
                let ExitSignal(reason) = *boxed;
                let error = match &reason {
                    ExitReason::UserError(msg) => {
                        Some(Box::<dyn std::error::Error + Send + Sync>::from(msg.clone()))
                    }
                    _ => None,
                };
                (reason, error)
            }
            Err(payload) => {
                let msg = panic_message(&payload);
                (
                    ExitReason::UserError(msg.clone()),
                    Some(Box::<dyn std::error::Error + Send + Sync>::from(msg)),
                )
            }
        },
    };
    let links = ctx.links().cloned().collect();
    ProcOutcome {
        id,
        reason,
        links,
        error,
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "proc panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use std::time::Duration;

    #[test]
    fn receive_unwraps_a_boxed_message() {
        let node = Node::new("test");
        let (done_tx, mut done_rx) = Mailbox::<u32>::channel();
        let target = node.clone().spawn(move |ctx| {
            ctx.receive(|msg| {
                let n = *msg.downcast::<u32>().unwrap();
                done_tx.offer(n * 2);
            })?;
            Ok(())
        });
        target.send(Box::new(21u32));
        assert_eq!(done_rx.take().unwrap(), 42);
        node.join_all();
    }

    #[test]
    fn receive_where_skips_non_matching_messages() {
        let node = Node::new("test");
        let (done_tx, mut done_rx) = Mailbox::<i32>::channel();
        let target = node.clone().spawn(move |ctx| {
            ctx.receive_where(
                |m| matches!(m.downcast_ref::<i32>(), Some(&n) if n > 100),
                |msg| {
                    let n = *msg.downcast::<i32>().unwrap();
                    done_tx.offer(n);
                },
            )?;
            Ok(())
        });
        target.send(Box::new(1i32));
        target.send(Box::new(2i32));
        target.send(Box::new(999i32));
        assert_eq!(done_rx.take().unwrap(), 999);
        node.join_all();
    }

    #[test]
    fn receive_timeout_returns_none_on_expiry() {
        let node = Node::new("test");
        let (done_tx, mut done_rx) = Mailbox::<bool>::channel();
        node.clone().spawn(move |ctx| {
            let got = ctx.receive_timeout(Duration::from_millis(50), |_msg| true)?;
            done_tx.offer(got.is_some());
            Ok(())
        });
        assert_eq!(done_rx.take().unwrap(), false);
        node.join_all();
    }

    #[test]
    fn exit_unwinds_as_normal() {
        let node = Node::new("test");
        let id = node.clone().spawn(move |ctx| {
            ctx.exit(ExitReason::Normal);
        });
        node.join_all();
        assert!(node.uncaught_exceptions().is_empty());
        drop(id);
    }
}
