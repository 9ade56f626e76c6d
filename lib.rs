/*!
An embedded Erlang-style actor runtime: procs running on OS threads,
talking to each other through lock-free mailboxes.

A [`Node`](node::Node) is a named collection of procs. Spawn one with a
closure (or a [`ProcBehavior`](proc::ProcBehavior) for callback-module
style) and you get back a [`ProcId`](proc_id::ProcId) — an opaque, clonable
handle usable to `send` it messages from any thread. Inside its body, a
proc gets a [`ProcContext`](proc::ProcContext) through which it can
`receive` (plain, selective, or timed), `link` to other procs, and `exit`.

```
use actor_rt::Node;

let node = Node::new("example");
let pong = node.spawn(|ctx| {
    ctx.receive(|msg| {
        if let Ok(n) = msg.downcast::<u32>() {
            println!("got {}", n);
        }
    })?;
    Ok(())
});
pong.send(Box::new(42u32));
node.join_all();
```

## What this crate is not

There's no remote-node networking — a [`Node`] is a single-process,
single-machine registry. There's no pattern-matching clause builder;
selective receive takes a plain `Fn(&Message) -> bool` predicate instead.
There's no free-function "current proc" layer (`self()`, bare `receive!`
macros); every operation takes an explicit `&mut ProcContext`. And there
are no monitors — only bidirectional links, and only OS-thread-granularity
scheduling, never preemption below that.

## Layout

- [`signal`] — [`SignalBarrier`](signal::SignalBarrier), the single-waiter
  park/unpark primitive the mailbox blocks on.
- [`mailbox`] — [`Mailbox`](mailbox::Mailbox) /
  [`MailboxSender`](mailbox::MailboxSender), the lock-free MPSC queue with
  FIFO and selective removal.
- [`system_message`] — the envelope and link-protocol message types
  multiplexed onto a proc's mailbox.
- [`proc_id`] — [`ProcId`](proc_id::ProcId), an opaque cross-thread handle.
- [`proc`] — [`ProcContext`](proc::ProcContext), [`ExitReason`](proc::ExitReason),
  and the panic-based exit protocol.
- [`node`] — [`Node`](node::Node), the registry/spawner/router.
- [`error`] — the shared error taxonomy.
*/

pub mod error;
pub mod mailbox;
pub mod node;
pub mod proc;
pub mod proc_id;
pub mod signal;
pub mod system_message;

pub use error::{Error, ProcError, UncaughtError};
pub use mailbox::{Mailbox, MailboxSender};
pub use node::Node;
pub use proc::{ExitReason, ProcBehavior, ProcContext, RecursiveStep};
pub use proc_id::ProcId;
pub use signal::SignalBarrier;
pub use system_message::{Envelope, Message, SystemMessage};
