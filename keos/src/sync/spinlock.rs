//! Spinlock.
//!
//! On a uniprocessor, a spinlock only needs to prevent the preemption of its
//! holder, which is what disabling interrupts does. A spinlock must be
//! released before the holder blocks.

/// Re-export of the machine spinlock.
pub use abyss::spinlock::{SpinLock, SpinLockGuard, WouldBlock};
