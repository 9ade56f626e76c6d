//! A single-waiter park/unpark coupling device.
//!
//! [`Mailbox`](crate::mailbox::Mailbox) needs exactly one thing from its
//! wakeup primitive: let one consumer block until *some* producer has
//! offered something, without making `offer` take a lock. A condition
//! variable would require `offer` to acquire the same mutex `take` parks
//! under; [`SignalBarrier`] instead keeps a single atomic slot holding the
//! parked thread (if any), so `signal` degenerates to a swap plus at most
//! one `unpark` syscall.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use crate::error::Error;

/// A park/unpark coupling for exactly one waiter at a time.
///
/// `await_` installs the calling thread as the owner of the barrier, parks,
/// and clears itself back out on wakeup (tolerating the spurious wakeups
/// `thread::park` is documented to produce). `signal` is wait-free and
/// idempotent when nobody is waiting.
pub struct SignalBarrier {
    owner: AtomicPtr<Thread>,
}

impl Default for SignalBarrier {
    fn default() -> Self {
        SignalBarrier::new()
    }
}

impl SignalBarrier {
    pub fn new() -> SignalBarrier {
        SignalBarrier {
            owner: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Install the calling thread as the barrier's waiter, then park until
    /// `signal()` wakes it (or a spurious wakeup occurs, in which case this
    /// still returns — callers must retest their wait condition).
    ///
    /// Fails with [`Error::InvalidArgument`] if another thread is already
    /// parked here; that is always a programming error, never a race a
    /// well-formed caller can hit, since each [`crate::mailbox::Mailbox`]
    /// has exactly one consumer.
    pub fn await_(&self) -> Result<(), Error> {
        self.install_waiter()?;
        thread::park();
        self.clear_waiter();
        Ok(())
    }

    /// As [`SignalBarrier::await_`], but bounded by `timeout`. Returns the
    /// unused remainder of `timeout` (zero if it fully elapsed).
    pub fn await_timeout(&self, timeout: Duration) -> Result<Duration, Error> {
        self.install_waiter()?;
        let start = Instant::now();
        thread::park_timeout(timeout);
        self.clear_waiter();
        Ok(timeout.saturating_sub(start.elapsed()))
    }

    /// Wake the current waiter, if any. A no-op when nobody is parked.
    pub fn signal(&self) {
        let prev = self.owner.swap(ptr::null_mut(), Ordering::AcqRel);
        if !prev.is_null() {
            // Safety: `prev` was produced by `Box::into_raw` in
            // `install_waiter` and nobody else can observe or free it once
            // the swap above has moved it out of `owner`.
            let thread = unsafe { Box::from_raw(prev) };
            thread.unpark();
        }
    }

    fn install_waiter(&self) -> Result<(), Error> {
        let boxed = Box::into_raw(Box::new(thread::current()));
        match self
            .owner
            .compare_exchange(ptr::null_mut(), boxed, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(_) => {
                // Safety: nobody else has a pointer to this box; we just made it.
                unsafe { drop(Box::from_raw(boxed)) };
                Err(Error::InvalidArgument(
                    "a second thread tried to await a SignalBarrier that already has a waiter",
                ))
            }
        }
    }

    /// Tolerate a spurious wakeup: clear our own slot if it's still us.
    fn clear_waiter(&self) {
        let prev = self.owner.swap(ptr::null_mut(), Ordering::AcqRel);
        if !prev.is_null() {
            unsafe { drop(Box::from_raw(prev)) };
        }
    }
}

impl Drop for SignalBarrier {
    fn drop(&mut self) {
        let prev = self.owner.swap(ptr::null_mut(), Ordering::AcqRel);
        if !prev.is_null() {
            unsafe { drop(Box::from_raw(prev)) };
        }
    }
}

// Safety: the owner pointer is only ever read/written through the atomic,
// and the `Thread` it points to is itself `Send + Sync`.
unsafe impl Send for SignalBarrier {}
unsafe impl Sync for SignalBarrier {}
