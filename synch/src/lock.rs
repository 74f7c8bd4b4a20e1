//! # Lock with priority donation.
//!
//! A [`Lock`] is a [`Semaphore`] with an initial value of 1 plus an owner.
//! Only the thread that acquired a lock may release it, and a thread may not
//! acquire a lock it already holds.
//!
//! ## Priority donation
//!
//! Suppose threads L, M and H have low, medium and high priority, L holds a
//! lock and H sleeps on it. Without intervention, M runs ahead of L forever
//! and H never gets the lock. To prevent this priority inversion, a thread
//! that sleeps on a held lock donates its effective priority to the holder;
//! if the holder itself sleeps on another lock, the donation travels on to
//! that lock's holder.
//!
//! Each thread remembers the donations it received, one per lock. Releasing a
//! lock returns the donation made through it, and the releaser falls back to
//! the maximum of its base priority and the donations it still holds.
//!
//! ```rust
//! let lock = Lock::new();
//! lock.acquire();
//! assert!(lock.held_by_current());
//! lock.release();
//! ```
use crate::{donation, semaphore::Semaphore};
use alloc::sync::Arc;
use keos::{
    interrupt::{InterruptGuard, in_interrupt_context},
    thread::{
        Current, Tid,
        donation::{LockId, OwnerSlot},
        scheduler::processor,
    },
};

/// A sleeping mutual-exclusion lock with priority donation.
pub struct Lock {
    slot: Arc<OwnerSlot>,
    sema: Semaphore,
}

impl Lock {
    /// Creates a free lock.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(OwnerSlot::new()),
            sema: Semaphore::new(1),
        }
    }

    /// The identity of the lock.
    pub fn id(&self) -> LockId {
        self.slot.id()
    }

    /// Acquires the lock, sleeping until it becomes available.
    ///
    /// If the lock is held, the caller donates its effective priority to the
    /// holder (and transitively to whatever the holder waits for) before it
    /// sleeps.
    ///
    /// # Panics
    /// Panics if called inside an interrupt handler, or if the current thread
    /// already holds the lock.
    pub fn acquire(&self) {
        assert!(
            !in_interrupt_context(),
            "Lock::acquire: cannot block inside an interrupt handler"
        );
        let current = Current::thread();
        assert!(
            !self.slot.is_owned_by(current.tid),
            "Lock::acquire: lock is already held by the current thread"
        );

        let _guard = InterruptGuard::new();
        loop {
            // Donate again after every wakeup: the permit may have gone to a
            // thread other than the one we donated to.
            if let Some(holder) = self.slot.owner() {
                let mut waiting = current.waiting.lock();
                waiting.record(self.slot.clone());
                waiting.unlock();

                log::trace!(
                    "lock {}: thread {} ({}) waits for thread {} ({})",
                    self.id().into_u64(),
                    current.tid,
                    current.priority(),
                    holder.tid,
                    holder.priority()
                );
                donation::propagate(current.priority(), holder, self.id());
            }
            if self.sema.down_or_sleep() {
                break;
            }
        }

        let mut waiting = current.waiting.lock();
        waiting.forget(self.id());
        waiting.unlock();
        // The threads left sleeping on the lock now donate to us.
        if let Some(priority) = self.sema.highest_waiter() {
            donation::donate(&current, self.id(), priority);
        }
        self.slot.set_owner(Some(current));
    }

    /// Tries to acquire the lock without sleeping.
    ///
    /// Returns whether the lock was acquired. Never donates. May be called
    /// from an interrupt handler, in which case the interrupted thread becomes
    /// the owner.
    ///
    /// # Panics
    /// Panics if the current thread already holds the lock.
    pub fn try_acquire(&self) -> bool {
        let current = Current::thread();
        assert!(
            !self.slot.is_owned_by(current.tid),
            "Lock::try_acquire: lock is already held by the current thread"
        );

        let _guard = InterruptGuard::new();
        let success = self.sema.try_down();
        if success {
            self.slot.set_owner(Some(current));
        }
        success
    }

    /// Releases the lock.
    ///
    /// The donation received through this lock is returned, and the most
    /// urgent waiter is woken. The caller yields if the woken thread is more
    /// urgent than the caller's restored priority.
    ///
    /// # Panics
    /// Panics if the current thread does not hold the lock.
    pub fn release(&self) {
        let current = Current::thread();
        assert!(
            self.slot.is_owned_by(current.tid),
            "Lock::release: lock is not held by the current thread"
        );

        let guard = InterruptGuard::new();
        donation::revoke(&current, self.id());
        self.slot.set_owner(None);
        drop(guard);

        self.sema.up();
        // Returning a donation may leave a ready thread more urgent than us
        // even when nobody was waiting.
        processor().preempt();
    }

    /// Whether the current thread holds the lock.
    pub fn held_by_current(&self) -> bool {
        self.slot.is_owned_by(Current::get_tid())
    }

    /// The id of the thread holding the lock.
    pub fn holder(&self) -> Option<Tid> {
        self.slot.owner().map(|th| th.tid)
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}
