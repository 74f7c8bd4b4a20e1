//! # Condition Variable.
//!
//! A **Condition Variable** allows a thread to sleep until some condition on
//! shared data holds. It is always used together with the [`Lock`] (or
//! [`Mutex`]) protecting that data: one thread waits while holding the lock,
//! and another, after changing the data under the same lock, signals it.
//!
//! ## Mesa semantics
//!
//! Waking up is not atomic with the signaler's continuation: after a
//! signaled thread wakes it must reacquire the lock, and by then the
//! condition may have changed again. A waiter must therefore re-check its
//! condition in a loop:
//!
//! ```rust
//! lock.acquire();
//! while !ready() {
//!     condvar.wait(&lock);
//! }
//! ```
//!
//! [`ConditionVariable::wait_while`] performs this loop for a [`Mutex`]:
//!
//! ```rust
//! let guard = condvar.wait_while(&mutex, |queue| queue.is_empty());
//! ```
//!
//! Every waiter sleeps on a semaphore of its own, so a signal wakes exactly
//! the waiter it picked: the one of the highest effective priority.
use crate::{
    lock::Lock,
    mutex::{Mutex, MutexGuard},
    semaphore::Semaphore,
    wait_queue::highest,
};
use alloc::{collections::VecDeque, sync::Arc};
use keos::{
    interrupt::in_interrupt_context,
    sync::SpinLock,
    thread::{Current, Thread},
};

struct Waiter {
    sema: Semaphore,
    thread: Arc<Thread>,
}

/// A Condition Variable
///
/// Functions in this module will block the current **thread** of execution.
/// Using more than one lock with the same condition variable is a logic
/// error.
#[derive(Default)]
pub struct ConditionVariable {
    waiters: SpinLock<VecDeque<Arc<Waiter>>>,
}

impl ConditionVariable {
    /// Creates a new condition variable which is ready to be waited on and
    /// signaled.
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Atomically releases `lock` and sleeps until signaled, then reacquires
    /// `lock` before returning.
    ///
    /// # Panics
    /// Panics if the current thread does not hold `lock`, or inside an
    /// interrupt handler.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            !in_interrupt_context(),
            "ConditionVariable::wait: cannot block inside an interrupt handler"
        );
        assert!(
            lock.held_by_current(),
            "ConditionVariable::wait: lock is not held by the current thread"
        );

        let waiter = Arc::new(Waiter {
            sema: Semaphore::new(0),
            thread: Current::thread(),
        });
        let mut waiters = self.waiters.lock();
        waiters.push_back(waiter.clone());
        waiters.unlock();

        lock.release();
        waiter.sema.down();
        lock.acquire();
    }

    /// Blocks the current thread while `predicate` returns `true`.
    ///
    /// This function locks `mutex` and checks the predicate. If it returns
    /// `true`, the thread waits, releasing the mutex while it sleeps. When the
    /// thread wakes up, it holds the mutex again and re-evaluates the
    /// predicate. The guard is returned once the predicate returns `false`.
    ///
    /// There is **no need to check the predicate before calling** `wait_while`.
    pub fn wait_while<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        predicate: impl Fn(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        let mut guard = mutex.lock();
        while predicate(&mut guard) {
            self.wait(guard.raw());
        }
        guard
    }

    /// Wakes up the most urgent thread waiting on this condition variable.
    ///
    /// Does nothing if no thread waits. Calls to `signal` are not buffered.
    ///
    /// # Panics
    /// Panics if the current thread does not hold `lock`.
    pub fn signal(&self, lock: &Lock) {
        assert!(
            lock.held_by_current(),
            "ConditionVariable::signal: lock is not held by the current thread"
        );
        self.signal_one();
    }

    /// Wakes up all threads waiting on this condition variable, most urgent
    /// first.
    ///
    /// # Panics
    /// Panics if the current thread does not hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        assert!(
            lock.held_by_current(),
            "ConditionVariable::broadcast: lock is not held by the current thread"
        );
        while self.signal_one() {}
    }

    fn signal_one(&self) -> bool {
        let mut waiters = self.waiters.lock();
        let woken = highest(&waiters, |w| w.thread.priority()).and_then(|idx| waiters.remove(idx));
        waiters.unlock();

        match woken {
            Some(waiter) => {
                log::trace!(
                    "condvar: signaling thread {} at priority {}",
                    waiter.thread.tid,
                    waiter.thread.priority()
                );
                waiter.sema.up();
                true
            }
            None => false,
        }
    }
}
