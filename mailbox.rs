//! An unbounded MPSC mailbox with FIFO and selective (predicate-based)
//! extraction, following Dmitry Vyukov's non-intrusive MPSC queue.
//!
//! A cheaply-cloneable [`MailboxSender`] serves the producer side, and a
//! single, non-`Clone` [`Mailbox`] serves the one consumer. That split is
//! load-bearing, not cosmetic — consumer operations (`poll`, `take`,
//! `*_match`) require `&mut self`, so the type system rules out the
//! two-consumer race this queue is not designed to survive: "consumer
//! operations take an exclusive reference" is enforced at compile time,
//! not by convention.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::Error;
use crate::signal::SignalBarrier;

struct Node<E> {
    item: Option<E>,
    next: AtomicPtr<Node<E>>,
}

impl<E> Node<E> {
    fn alloc(item: Option<E>) -> *mut Node<E> {
        Box::into_raw(Box::new(Node {
            item,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// State shared between the one consumer and all producers.
///
/// `head` lives here (rather than on [`Mailbox`] itself) so that the whole
/// node chain is kept alive — and only freed — once every handle into it,
/// consumer and producers alike, has been dropped. Freeing nodes from
/// `Mailbox::drop` directly would race a producer that is still mid-`offer`
/// against a consumer that outlived its last sender by less than a
/// heartbeat; tying reclamation to the shared `Arc` sidesteps that.
struct Shared<E> {
    tail: AtomicPtr<Node<E>>,
    head: UnsafeCell<*mut Node<E>>,
    barrier: SignalBarrier,
    interrupted: AtomicBool,
}

// Safety: `tail`, `barrier`, and `interrupted` are genuinely shared and
// atomic/lock-free. `head` is only ever read or written through `Mailbox`'s
// `&mut self` methods, and `Mailbox` is not `Clone`, so there is at most one
// mutator for it at any time — the single-consumer invariant the type is
// built to enforce.
unsafe impl<E: Send> Send for Shared<E> {}
unsafe impl<E: Send> Sync for Shared<E> {}

impl<E> Drop for Shared<E> {
    fn drop(&mut self) {
        unsafe {
            let mut cur = *self.head.get();
            while !cur.is_null() {
                let next = (*cur).next.load(Ordering::Acquire);
                drop(Box::from_raw(cur));
                cur = next;
            }
        }
    }
}

/// The producer half of a mailbox. Cheap to clone; any number of threads
/// may hold and use one concurrently.
pub struct MailboxSender<E> {
    inner: Arc<Shared<E>>,
}

impl<E> Clone for MailboxSender<E> {
    fn clone(&self) -> Self {
        MailboxSender {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Send> MailboxSender<E> {
    /// Enqueue `item`. Never blocks, never fails: the mailbox is unbounded.
    pub fn offer(&self, item: E) {
        let node = Node::alloc(Some(item));
        // Producer linearization point.
        let prev = self.inner.tail.swap(node, Ordering::AcqRel);
        // Safety: `prev` was a node previously installed as `tail` by some
        // `offer` (or is the original sentinel); it is only ever freed
        // after its own `next` has been observed non-null by the consumer,
        // which cannot have happened yet since we are the one about to
        // write it.
        unsafe {
            (*prev).next.store(node, Ordering::Release);
        }
        self.inner.barrier.signal();
    }

    /// Ask the mailbox's consumer to stop blocking: sets the interrupt
    /// flag and wakes it if it is currently parked. The next blocking
    /// operation it performs (or the current one, if it is parked right
    /// now) returns [`Error::Interrupted`].
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
        self.inner.barrier.signal();
    }
}

/// The single consumer half of a mailbox.
pub struct Mailbox<E> {
    inner: Arc<Shared<E>>,
}

impl<E> Mailbox<E> {
    /// Create a fresh mailbox and its paired sender.
    pub fn channel() -> (MailboxSender<E>, Mailbox<E>) {
        let sentinel = Node::<E>::alloc(None);
        let inner = Arc::new(Shared {
            tail: AtomicPtr::new(sentinel),
            head: UnsafeCell::new(sentinel),
            barrier: SignalBarrier::new(),
            interrupted: AtomicBool::new(false),
        });
        (
            MailboxSender {
                inner: inner.clone(),
            },
            Mailbox { inner },
        )
    }

    fn head(&self) -> *mut Node<E> {
        unsafe { *self.inner.head.get() }
    }

    fn set_head(&mut self, node: *mut Node<E>) {
        unsafe {
            *self.inner.head.get() = node;
        }
    }

    /// True if no message is currently queued (a snapshot, not a guarantee
    /// about what `poll` returns a moment later).
    pub fn is_empty(&self) -> bool {
        unsafe { (*self.head()).next.load(Ordering::Acquire).is_null() }
    }

    /// Dequeue the head element, or return `None` without blocking.
    pub fn poll(&mut self) -> Option<E> {
        unsafe {
            let head = self.head();
            let next = (*head).next.load(Ordering::Acquire);
            if next.is_null() {
                return None;
            }
            let item = (*next).item.take();
            self.set_head(next);
            drop(Box::from_raw(head));
            item
        }
    }

    /// Dequeue the head element, blocking until one is available or this
    /// mailbox's consumer is interrupted.
    pub fn take(&mut self) -> Result<E, Error> {
        loop {
            if let Some(item) = self.poll() {
                return Ok(item);
            }
            if self.take_interrupted() {
                return Err(Error::Interrupted);
            }
            self.inner.barrier.await_()?;
        }
    }

    /// As [`Mailbox::take`], but bounded by `timeout`. `Ok(None)` on expiry.
    /// `timeout == Duration::ZERO` behaves exactly like [`Mailbox::poll`].
    pub fn poll_timeout(&mut self, timeout: Duration) -> Result<Option<E>, Error> {
        if let Some(item) = self.poll() {
            return Ok(Some(item));
        }
        if timeout.is_zero() {
            return Ok(None);
        }
        let mut remaining = timeout;
        loop {
            if self.take_interrupted() {
                return Err(Error::Interrupted);
            }
            remaining = self.inner.barrier.await_timeout(remaining)?;
            if let Some(item) = self.poll() {
                return Ok(Some(item));
            }
            if remaining.is_zero() {
                return Ok(None);
            }
        }
    }

    /// Scan in FIFO order for the first element satisfying `pred`, remove
    /// it, and return it. Every other element keeps its original relative
    /// order. Never blocks.
    pub fn poll_match<F: Fn(&E) -> bool>(&mut self, pred: F) -> Option<E> {
        self.scan_remove(self.head(), &pred).ok()
    }

    /// As [`Mailbox::poll_match`], but blocks indefinitely until a match
    /// arrives (or the consumer is interrupted).
    pub fn take_match<F: Fn(&E) -> bool>(&mut self, pred: F) -> Result<E, Error> {
        let mut cursor = self.head();
        loop {
            match self.scan_remove(cursor, &pred) {
                Ok(item) => return Ok(item),
                Err(last_prev) => {
                    cursor = last_prev;
                    if self.take_interrupted() {
                        return Err(Error::Interrupted);
                    }
                    self.inner.barrier.await_()?;
                }
            }
        }
    }

    /// As [`Mailbox::take_match`], but bounded by `timeout`.
    pub fn poll_match_timeout<F: Fn(&E) -> bool>(
        &mut self,
        pred: F,
        timeout: Duration,
    ) -> Result<Option<E>, Error> {
        let mut cursor = self.head();
        match self.scan_remove(cursor, &pred) {
            Ok(item) => return Ok(Some(item)),
            Err(last_prev) => cursor = last_prev,
        }
        if timeout.is_zero() {
            return Ok(None);
        }
        let mut remaining = timeout;
        loop {
            if self.take_interrupted() {
                return Err(Error::Interrupted);
            }
            remaining = self.inner.barrier.await_timeout(remaining)?;
            match self.scan_remove(cursor, &pred) {
                Ok(item) => return Ok(Some(item)),
                Err(last_prev) => cursor = last_prev,
            }
            if remaining.is_zero() {
                return Ok(None);
            }
        }
    }

    /// Move up to `max` queued elements into `sink`, FIFO order. Returns
    /// the number moved.
    pub fn drain_to(&mut self, sink: &mut Vec<E>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.poll() {
                Some(item) => {
                    sink.push(item);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    fn take_interrupted(&self) -> bool {
        self.inner.interrupted.swap(false, Ordering::AcqRel)
    }

    /// One pass over the reachable list starting at `start`, looking for
    /// the first element satisfying `pred`. `Ok(item)` on a match (the node
    /// has already been unlinked); `Err(prev)` on reaching the end, where
    /// `prev` is the last node visited, so a blocking caller can resume
    /// from there rather than rescanning from `head` on every wakeup.
    fn scan_remove<F: Fn(&E) -> bool>(
        &mut self,
        start: *mut Node<E>,
        pred: &F,
    ) -> Result<E, *mut Node<E>> {
        unsafe {
            let mut prev = start;
            loop {
                let cur = (*prev).next.load(Ordering::Acquire);
                if cur.is_null() {
                    return Err(prev);
                }
                let item_matches = pred((*cur).item.as_ref().expect("live node holds an item"));
                if item_matches {
                    return Ok(self.unlink_and_extract(prev, cur));
                }
                prev = cur;
            }
        }
    }

    /// Remove `cur` (a child of `prev`) from the list and return its item,
    /// per the three-way case analysis in the mailbox's removal contract.
    ///
    /// # Safety
    /// `prev` and `cur` must both be live nodes reachable from `self.head()`
    /// with `cur == prev.next`.
    unsafe fn unlink_and_extract(&mut self, prev: *mut Node<E>, cur: *mut Node<E>) -> E {
        let observed_next = (*cur).next.load(Ordering::Acquire);
        if observed_next.is_null() {
            // `cur` looks like the tail. Confirm it atomically against
            // concurrent producers before acting on that belief.
            match self
                .inner
                .tail
                .compare_exchange(cur, prev, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    // `cur` is gone from the tail position; clear the
                    // dangling forward link so a later scan starting at
                    // `prev` doesn't wander into freed memory.
                    let _ = (*prev).next.compare_exchange(
                        cur,
                        ptr::null_mut(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    let item = (*cur).item.take().expect("matched node holds an item");
                    drop(Box::from_raw(cur));
                    item
                }
                Err(_) => {
                    // A producer's `tail.swap` has already moved past
                    // `cur`, but its `next.store` hasn't landed yet. This
                    // is the transient window the design calls out: wait
                    // for the link rather than conclude `cur` was the end.
                    let mut next = (*cur).next.load(Ordering::Acquire);
                    while next.is_null() {
                        thread::yield_now();
                        next = (*cur).next.load(Ordering::Acquire);
                    }
                    (*prev).next.store(next, Ordering::Release);
                    let item = (*cur).item.take().expect("matched node holds an item");
                    drop(Box::from_raw(cur));
                    item
                }
            }
        } else if prev == self.head() {
            // `cur` is the first unconsumed element and has a successor:
            // adopt it as the new sentinel, mirroring `poll`'s advance, and
            // retire the old sentinel.
            let item = (*cur).item.take().expect("matched node holds an item");
            let old_head = self.head();
            self.set_head(cur);
            drop(Box::from_raw(old_head));
            item
        } else {
            // Interior node: both predecessor and successor exist, and
            // single-consumer discipline makes the plain store safe.
            (*prev).next.store(observed_next, Ordering::Release);
            let item = (*cur).item.take().expect("matched node holds an item");
            drop(Box::from_raw(cur));
            item
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn s1_fifo_basic() {
        let (tx, mut rx) = Mailbox::<i32>::channel();
        tx.offer(1);
        tx.offer(2);
        tx.offer(3);
        assert_eq!(rx.poll(), Some(1));
        assert_eq!(rx.poll(), Some(2));
        assert_eq!(rx.poll(), Some(3));
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn s2_selective_receive() {
        let (tx, mut rx) = Mailbox::<i32>::channel();
        for x in [10, 1, 2, 3, 4] {
            tx.offer(x);
        }
        assert_eq!(rx.poll_match(|&x| x > 2), Some(10));
        assert_eq!(rx.poll_match(|&x| x > 2), Some(3));
        assert_eq!(rx.poll_match(|&x| x > 2), Some(4));
        assert_eq!(rx.poll(), Some(1));
        assert_eq!(rx.poll(), Some(2));
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn s3_timed_selective_wait() {
        let (tx, mut rx) = Mailbox::<&'static str>::channel();
        // Represent "is an Integer" as "is numeric" for a string mailbox,
        // keeping the scenario's shape without needing `dyn Any` here.
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            tx.offer("obj-a");
            tx.offer("obj-b");
            tx.offer("not-it");
            thread::sleep(Duration::from_millis(30));
            tx.offer("42");
        });
        let is_numeric = |s: &&'static str| s.chars().all(|c| c.is_ascii_digit());
        let got = rx
            .poll_match_timeout(is_numeric, Duration::from_secs(2))
            .unwrap();
        assert_eq!(got, Some("42"));
        assert_eq!(rx.poll(), Some("obj-a"));
        assert_eq!(rx.poll(), Some("obj-b"));
        assert_eq!(rx.poll(), Some("not-it"));
        assert_eq!(rx.poll(), None);
        producer.join().unwrap();
    }

    #[test]
    fn take_blocks_until_offer() {
        let (tx, mut rx) = Mailbox::<i32>::channel();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            tx.offer(7);
        });
        assert_eq!(rx.take().unwrap(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn poll_zero_behaves_like_poll() {
        let (tx, mut rx) = Mailbox::<i32>::channel();
        assert_eq!(rx.poll_timeout(Duration::ZERO).unwrap(), None);
        tx.offer(1);
        assert_eq!(rx.poll_timeout(Duration::ZERO).unwrap(), Some(1));
    }

    #[test]
    fn poll_match_zero_does_not_block() {
        let (_tx, mut rx) = Mailbox::<i32>::channel();
        assert_eq!(
            rx.poll_match_timeout(|_| true, Duration::ZERO).unwrap(),
            None
        );
    }

    #[test]
    fn interrupt_wakes_blocked_take() {
        let (tx, mut rx) = Mailbox::<i32>::channel();
        let err = {
            let tx2 = tx.clone();
            let interrupter = thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                tx2.interrupt();
            });
            let result = rx.take();
            interrupter.join().unwrap();
            result
        };
        assert!(matches!(err, Err(Error::Interrupted)));
        drop(tx);
    }

    #[test]
    fn drain_to_collects_in_order() {
        let (tx, mut rx) = Mailbox::<i32>::channel();
        for x in 0..5 {
            tx.offer(x);
        }
        let mut sink = Vec::new();
        let n = rx.drain_to(&mut sink, 3);
        assert_eq!(n, 3);
        assert_eq!(sink, vec![0, 1, 2]);
        assert_eq!(rx.poll(), Some(3));
        assert_eq!(rx.poll(), Some(4));
    }

    #[test]
    fn mailbox_drops_with_outstanding_sender_without_leaking_or_crashing() {
        let (tx, rx) = Mailbox::<StdArc<i32>>::channel();
        let payload = StdArc::new(5);
        tx.offer(payload.clone());
        drop(rx);
        // The sender can be dropped after the receiver without UB; the
        // `Shared` node chain stays alive until both sides are gone.
        drop(tx);
        assert_eq!(StdArc::strong_count(&payload), 1);
    }

    #[test]
    fn concurrent_producers_preserve_per_sender_fifo() {
        let (tx, mut rx) = Mailbox::<(u8, u32)>::channel();
        let mut handles = Vec::new();
        for sender in 0..4u8 {
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200u32 {
                    tx.offer((sender, i));
                }
            }));
        }
        drop(tx);
        for h in handles {
            h.join().unwrap();
        }
        let mut last_seen = [None; 4];
        let mut received = 0;
        while let Some((sender, i)) = rx.poll() {
            if let Some(prev) = last_seen[sender as usize] {
                assert!(i > prev, "per-sender order violated");
            }
            last_seen[sender as usize] = Some(i);
            received += 1;
        }
        assert_eq!(received, 800);
    }
}
