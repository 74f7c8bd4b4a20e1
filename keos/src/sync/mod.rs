//! Synchronization primitives of the machine layer.
//!
//! Only the interrupt-disabling [`SpinLock`] lives here. The sleeping
//! primitives (semaphores, locks, condition variables) are built on top of
//! the thread layer in the `keos-synch` crate.
pub mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
