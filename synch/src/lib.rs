//! # Synchronization Primitives.
//!
//! A kernel must coordinate access to shared resources among its threads.
//! The [`SpinLock`] of the machine layer gives correct mutual exclusion by
//! disabling interrupts, but a thread may not sleep while holding one. The
//! primitives of this crate put waiting threads to sleep instead:
//!
//! - [`Semaphore`]: a nonnegative counter with a wait queue. The foundation of
//!   everything else.
//! - [`Lock`]: a semaphore of one permit with an owner. A thread blocking on a
//!   lock *donates* its priority to the holder, and transitively to whoever
//!   the holder is waiting for, so a low-priority holder cannot indefinitely
//!   delay a high-priority waiter (priority inversion).
//! - [`ConditionVariable`]: Mesa-style condition waiting, paired with a
//!   [`Lock`].
//! - [`Mutex`]: a [`Lock`] that owns the data it protects.
//!
//! | Primitive             | Blocks Thread? | Wake order         | Typical Use Case                          |
//! |-----------------------|----------------|--------------------|-------------------------------------------|
//! | [`SpinLock`]          | No             | -                  | Short critical sections, queue bookkeeping |
//! | [`Semaphore`]         | Yes            | Highest priority   | Counting resources, one-shot signals      |
//! | [`Lock`] / [`Mutex`]  | Yes            | Highest priority   | Exclusive access, with priority donation  |
//! | [`ConditionVariable`] | Yes            | Highest priority   | Waiting for a predicate over shared state |
//!
//! Every queue in this crate wakes the waiter with the highest *effective*
//! priority first, never simply the oldest one: under priority scheduling a
//! FIFO wakeup would let a low-priority thread run ahead of a more urgent
//! one.
//!
//! All internal state is protected only by disabling interrupts, so the
//! non-blocking operations ([`Semaphore::try_down`], [`Semaphore::up`],
//! [`Lock::try_acquire`]) may be used from interrupt handlers. The blocking
//! ones may not; calling them there is a fatal error, as is any other misuse
//! (releasing a lock one does not hold, acquiring a lock twice, waiting on a
//! condition without its lock).
//!
//! [`SpinLock`]: keos::sync::SpinLock
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

extern crate alloc;

pub mod condition_variable;
mod donation;
pub mod lock;
pub mod mutex;
pub mod semaphore;
mod wait_queue;

pub use condition_variable::ConditionVariable;
pub use lock::Lock;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::Semaphore;
