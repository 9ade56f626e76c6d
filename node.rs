//! `Node`: the process registry, spawner, message router, and
//! uncaught-exception sink for a collection of procs running on OS threads
//! local to this machine.
//!
//! Each proc owns its own mailbox, looked up by sequence number in a
//! concurrent map; the spawner keeps a `Vec<JoinHandle<_>>` it joins on
//! `join_all`. The registry itself is a `DashMap`, sized for many short-
//! lived procs registering and deregistering concurrently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{ProcError, UncaughtError};
use crate::mailbox::{Mailbox, MailboxSender};
use crate::proc::{run_body, ProcBehavior, ProcContext, ProcOutcome, RecursiveStep};
use crate::proc_id::ProcId;
use crate::system_message::{Envelope, Message, SystemMessage};

struct ProcEntry {
    sender: MailboxSender<Envelope>,
}

/// A named collection of procs. Owns their registry, routes messages and
/// link notifications between them, and collects uncaught user errors.
///
/// Always used behind an `Arc` — `ProcId` and `ProcContext` both hold a
/// back-reference to their owning `Node`, so the registry and the procs it
/// spawns share ownership of it rather than the node owning its procs
/// outright.
pub struct Node {
    name: String,
    procs: DashMap<u64, ProcEntry>,
    next_seq: AtomicU64,
    handles: Mutex<Vec<JoinHandle<()>>>,
    uncaught: Mutex<Vec<UncaughtError>>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Arc<Node> {
        Arc::new(Node {
            name: name.into(),
            procs: DashMap::new(),
            next_seq: AtomicU64::new(0),
            handles: Mutex::new(Vec::new()),
            uncaught: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn a proc running `body` on its own OS thread.
    pub fn spawn(
        self: &Arc<Self>,
        body: impl FnOnce(&mut ProcContext) -> Result<(), ProcError> + Send + 'static,
    ) -> ProcId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (sender, mailbox) = Mailbox::<Envelope>::channel();
        let id = ProcId {
            node: self.clone(),
            seq,
        };
        self.procs.insert(seq, ProcEntry { sender });

        let node = self.clone();
        let ctx = ProcContext::new(id.clone(), mailbox);
        let handle = thread::spawn(move || {
            log::debug!("{} spawned", ctx.id());
            let outcome = run_body(ctx, body);
            node.finalize_proc(outcome);
        });
        self.handles.lock().push(handle);
        id
    }

    pub fn spawn1<A, F>(self: &Arc<Self>, arg: A, body: F) -> ProcId
    where
        A: Send + 'static,
        F: FnOnce(A, &mut ProcContext) -> Result<(), ProcError> + Send + 'static,
    {
        self.spawn(move |ctx| body(arg, ctx))
    }

    pub fn spawn2<A, B, F>(self: &Arc<Self>, a: A, b: B, body: F) -> ProcId
    where
        A: Send + 'static,
        B: Send + 'static,
        F: FnOnce(A, B, &mut ProcContext) -> Result<(), ProcError> + Send + 'static,
    {
        self.spawn(move |ctx| body(a, b, ctx))
    }

    pub fn spawn3<A, B, C, F>(self: &Arc<Self>, a: A, b: B, c: C, body: F) -> ProcId
    where
        A: Send + 'static,
        B: Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B, C, &mut ProcContext) -> Result<(), ProcError> + Send + 'static,
    {
        self.spawn(move |ctx| body(a, b, c, ctx))
    }

    pub fn spawn4<A, B, C, D, F>(self: &Arc<Self>, a: A, b: B, c: C, d: D, body: F) -> ProcId
    where
        A: Send + 'static,
        B: Send + 'static,
        C: Send + 'static,
        D: Send + 'static,
        F: FnOnce(A, B, C, D, &mut ProcContext) -> Result<(), ProcError> + Send + 'static,
    {
        self.spawn(move |ctx| body(a, b, c, d, ctx))
    }

    /// Spawn a proc with a recursive body: `step` is called with the
    /// current state and returns either the next state
    /// ([`RecursiveStep::Continue`]) or [`RecursiveStep::Stop`] to
    /// terminate: a function from a state value to the next state value,
    /// looping until a stop sentinel.
    pub fn spawn_recursive<S, F>(self: &Arc<Self>, initial: S, mut step: F) -> ProcId
    where
        S: Send + 'static,
        F: FnMut(S, &mut ProcContext) -> Result<RecursiveStep<S>, ProcError> + Send + 'static,
    {
        self.spawn(move |ctx| {
            let mut state = initial;
            loop {
                match step(state, ctx)? {
                    RecursiveStep::Continue(next) => state = next,
                    RecursiveStep::Stop => return Ok(()),
                }
            }
        })
    }

    /// Spawn a proc whose entire body is `behavior.run`.
    pub fn spawn_behavior<B: ProcBehavior>(self: &Arc<Self>, mut behavior: B) -> ProcId {
        self.spawn(move |ctx| behavior.run(ctx))
    }

    /// Block until every proc spawned so far (at the time of the call) has
    /// terminated. Procs spawned by another thread after this call started
    /// may or may not be waited on — a weakly consistent snapshot, not a
    /// barrier.
    pub fn join_all(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// A snapshot of every user error no proc has caught so far. Calling
    /// this again (or from another thread) sees the same entries plus
    /// whatever arrived since — it does not consume the sink.
    pub fn uncaught_exceptions(&self) -> Vec<UncaughtError> {
        self.uncaught.lock().clone()
    }

    pub(crate) fn deliver_user(&self, seq: u64, msg: Message) {
        if let Some(entry) = self.procs.get(&seq) {
            entry.sender.offer(Envelope::User(msg));
        }
    }

    pub(crate) fn deliver_system(&self, seq: u64, msg: SystemMessage) {
        if let Some(entry) = self.procs.get(&seq) {
            entry.sender.offer(Envelope::System(msg));
        }
    }

    fn finalize_proc(&self, outcome: ProcOutcome) {
        self.procs.remove(&outcome.id.seq());
        log::debug!("{} exited: {}", outcome.id, outcome.reason);

        if outcome.reason.is_abnormal() {
            for link in &outcome.links {
                link.node().deliver_system(
                    link.seq(),
                    SystemMessage::LinkExit {
                        from: outcome.id.clone(),
                        reason: outcome.reason.to_string(),
                    },
                );
            }
        }

        if let (true, Some(error)) = (outcome.reason.is_abnormal(), outcome.error) {
            self.uncaught.lock().push(UncaughtError {
                proc: outcome.id,
                error: error.into(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::ExitReason;
    use std::time::Duration;

    #[test]
    fn spawn_and_send_roundtrip() {
        let node = Node::new("test");
        let (reply_tx, mut reply_rx) = Mailbox::<i32>::channel();
        let target = node.spawn(move |ctx| {
            ctx.receive(|msg| {
                let n = *msg.downcast::<i32>().unwrap();
                reply_tx.offer(n + 1);
            })?;
            Ok(())
        });
        target.send(Box::new(41i32));
        assert_eq!(reply_rx.take().unwrap(), 42);
        node.join_all();
    }

    #[test]
    fn spawn2_passes_both_curried_arguments() {
        let node = Node::new("test");
        let (reply_tx, mut reply_rx) = Mailbox::<i32>::channel();
        node.spawn2(20i32, 22i32, move |a, b, _ctx| {
            reply_tx.offer(a + b);
            Ok(())
        });
        assert_eq!(reply_rx.take().unwrap(), 42);
        node.join_all();
    }

    #[test]
    fn spawn_recursive_counts_down_to_the_stop_sentinel() {
        let node = Node::new("test");
        let (reply_tx, mut reply_rx) = Mailbox::<Vec<u32>>::channel();
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let seen_in_body = seen.clone();
        node.spawn_recursive(3u32, move |n, _ctx| {
            seen_in_body.lock().push(n);
            if n == 0 {
                reply_tx.offer(seen_in_body.lock().clone());
                Ok(RecursiveStep::Stop)
            } else {
                Ok(RecursiveStep::Continue(n - 1))
            }
        });
        assert_eq!(reply_rx.take().unwrap(), vec![3, 2, 1, 0]);
        node.join_all();
    }

    struct Counter {
        remaining: u32,
        reply: MailboxSender<u32>,
        seen: u32,
    }

    impl ProcBehavior for Counter {
        fn run(&mut self, ctx: &mut ProcContext) -> Result<(), ProcError> {
            while self.remaining > 0 {
                ctx.receive::<()>(|_| {})?;
                self.remaining -= 1;
                self.seen += 1;
            }
            self.reply.offer(self.seen);
            Ok(())
        }
    }

    #[test]
    fn spawn_behavior_drives_a_stateful_impl_to_completion() {
        let node = Node::new("test");
        let (reply_tx, mut reply_rx) = Mailbox::<u32>::channel();
        let id = node.spawn_behavior(Counter {
            remaining: 3,
            reply: reply_tx,
            seen: 0,
        });
        id.send(Box::new(()));
        id.send(Box::new(()));
        id.send(Box::new(()));
        assert_eq!(reply_rx.take().unwrap(), 3);
        node.join_all();
    }

    #[test]
    fn send_to_a_terminated_proc_is_a_silent_no_op() {
        let node = Node::new("test");
        let gone = node.spawn(|_ctx| Ok(()));
        node.join_all();
        gone.send(Box::new(1i32));
    }

    #[test]
    fn s5_abnormal_exit_propagates_to_links_once() {
        let node = Node::new("test");
        let (done_tx, mut done_rx) = Mailbox::<()>::channel();

        let bad = node.spawn(move |ctx| {
            ctx.receive::<()>(|_| unreachable!())?;
            Ok(())
        });

        for _ in 0..99u32 {
            let bad = bad.clone();
            let done_tx = done_tx.clone();
            node.spawn(move |ctx| {
                ctx.link(&bad);
                let result = ctx.receive::<()>(|_| unreachable!());
                done_tx.offer(());
                match result {
                    Err(ProcError::Interrupted) => Ok(()),
                    other => other.map(|_| ()),
                }
            });
        }

        // Give every linker a chance to register before `bad` blows up.
        thread::sleep(Duration::from_millis(100));
        bad.send(Box::new("boom"));
        drop(done_tx);
        for _ in 0..99u32 {
            done_rx.take().unwrap();
        }
        node.join_all();
        assert_eq!(node.uncaught_exceptions().len(), 1);
    }

    #[test]
    fn s6_normal_exit_does_not_propagate_to_links() {
        let node = Node::new("test");
        let peer = node.spawn(|ctx| {
            ctx.exit(ExitReason::Normal);
        });
        let (done_tx, mut done_rx) = Mailbox::<bool>::channel();
        node.spawn(move |ctx| {
            ctx.link(&peer);
            let got = ctx.receive_timeout(Duration::from_millis(100), |_| ())?;
            done_tx.offer(got.is_some());
            Ok(())
        });
        assert_eq!(done_rx.take().unwrap(), false);
        node.join_all();
        assert!(node.uncaught_exceptions().is_empty());
    }
}
