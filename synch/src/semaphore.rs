//! # Semaphore.
//!
//! A **semaphore** is a nonnegative integer together with two atomic
//! operations to manipulate it:
//!
//! - "Down" ([`Semaphore::down`]): wait for the value to become positive, then
//!   decrement it.
//! - "Up" ([`Semaphore::up`]): increment the value and wake up one waiting
//!   thread, if any.
//!
//! A semaphore initialized to 0 is a one-shot (or repeating) event signal; a
//! semaphore initialized to `n` lets up to `n` threads use a resource at
//! once.
//!
//! The counter and the wait queue are protected by disabling interrupts, never
//! by a [`Lock`], since the lock is itself built from a semaphore. Waiters are
//! woken highest effective priority first.
//!
//! #### Usage Example
//!
//! ```rust
//! let done = Arc::new(Semaphore::new(0));
//! let worker = {
//!     let done = done.clone();
//!     ThreadBuilder::new("worker").spawn(move || {
//!         // ...
//!         done.up();
//!     })
//! };
//! done.down(); // Sleeps until the worker has finished.
//! ```
//!
//! [`Lock`]: crate::Lock
use crate::wait_queue::WaitQueue;
use alloc::sync::Arc;
use keos::{
    interrupt::{InterruptGuard, in_interrupt_context},
    sync::SpinLock,
    thread::{Current, Priority, ThreadBuilder, scheduler::processor},
};

struct SemaphoreInner {
    value: usize,
    waiters: WaitQueue,
}

/// A counting semaphore.
pub struct Semaphore {
    inner: SpinLock<SemaphoreInner>,
}

impl Semaphore {
    /// Creates a semaphore whose counter starts at `value`, with no waiters.
    pub const fn new(value: usize) -> Self {
        Self {
            inner: SpinLock::new(SemaphoreInner {
                value,
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// Waits for the value to become positive and then decrements it.
    ///
    /// The thread sleeps while the value is zero. Wakeups are not
    /// reservations: another thread may take the permit between the wakeup and
    /// the moment the sleeper runs, in which case it goes back to sleep.
    ///
    /// # Panics
    /// Panics if called inside an interrupt handler.
    pub fn down(&self) {
        assert!(
            !in_interrupt_context(),
            "Semaphore::down: cannot block inside an interrupt handler"
        );
        let _guard = InterruptGuard::new();
        while !self.down_or_sleep() {}
    }

    /// Takes a permit if one is available. Otherwise sleeps once on the wait
    /// queue and returns `false` after being woken, without retrying.
    ///
    /// Callers keep interrupts disabled across the call.
    pub(crate) fn down_or_sleep(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.value > 0 {
            inner.value -= 1;
            inner.unlock();
            return true;
        }
        Current::park_with(move |handle| {
            inner.waiters.push(handle);
            inner.unlock();
        });
        false
    }

    /// The effective priority of the most urgent sleeper, if any.
    pub(crate) fn highest_waiter(&self) -> Option<Priority> {
        let inner = self.inner.lock();
        let highest = inner.waiters.highest_priority();
        inner.unlock();
        highest
    }

    /// Decrements the value if it is positive, without blocking.
    ///
    /// Returns whether the value was decremented. May be called from an
    /// interrupt handler.
    pub fn try_down(&self) -> bool {
        let mut inner = self.inner.lock();
        let success = inner.value > 0;
        if success {
            inner.value -= 1;
        }
        inner.unlock();
        success
    }

    /// Increments the value and wakes the most urgent waiter, if any.
    ///
    /// The caller yields right away if the woken thread is more urgent than
    /// itself; inside an interrupt handler, the yield happens on return. May be
    /// called from an interrupt handler.
    pub fn up(&self) {
        let mut inner = self.inner.lock();
        inner.value += 1;
        let woken = inner.waiters.pop_highest();
        let remaining = inner.waiters.len();
        inner.unlock();

        if let Some(handle) = woken {
            log::trace!(
                "semaphore: waking thread {} at priority {} ({} still waiting)",
                handle.thread().tid,
                handle.priority(),
                remaining
            );
            handle.unpark();
            processor().preempt();
        }
    }

    /// The current value of the counter.
    ///
    /// The value may change as soon as this returns; use it for diagnostics
    /// only.
    pub fn value(&self) -> usize {
        let inner = self.inner.lock();
        let value = inner.value;
        inner.unlock();
        value
    }

    /// Self-test for semaphores that makes control "ping-pong" between a pair
    /// of threads.
    pub fn self_test() {
        let sema = Arc::new([Semaphore::new(0), Semaphore::new(0)]);

        keos::print!("Testing semaphores...");
        let helper = {
            let sema = sema.clone();
            ThreadBuilder::new("sema-test").spawn(move || {
                for _ in 0..10 {
                    sema[0].down();
                    sema[1].up();
                }
            })
        };
        for _ in 0..10 {
            sema[0].up();
            sema[1].down();
        }
        helper.join();
        keos::println!("done.");
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}
