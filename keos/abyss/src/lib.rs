//! The abyss of kernel that operates the (hosted) machine.
//!
//! This crate contains the lowest layer of the kernel: the interrupt level of
//! the processor, the spinlock that every other primitive is built on, and the
//! kernel console. On real hardware these talk to `cli`/`sti` and the serial
//! port; here they are backed by a hosted uniprocessor so the same call sites
//! run as ordinary host code.
//!
//! You are **not** required to understand every line of code in this crate.
//! Instead, see the [`keos`] crate for which modules (or functions) are
//! available for implementing the synchronization primitives.
//!
//! [`keos`]: ../keos/index.html
#![deny(missing_docs)]

use core::sync::atomic::AtomicBool;

#[doc(hidden)]
#[macro_use]
pub mod kprint;
pub mod interrupt;
pub mod spinlock;

#[doc(hidden)]
pub use log as __log;

/// Suppress console logging when set.
#[doc(hidden)]
pub static QUIET: AtomicBool = AtomicBool::new(false);
