//! # KeOS: the thread layer of a hosted educational kernel
//!
//! This crate provides everything the synchronization primitives of the kernel
//! lean on: threads with base and effective priorities, a priority scheduler,
//! a single simulated processor with an interrupt flag and interrupt
//! delivery, and the boot entry that runs a kernel instance.
//!
//! ## The hosted machine
//!
//! A kernel instance runs on exactly one [`Processor`]. Every kernel thread
//! is backed by a host thread, but only the thread holding the processor
//! executes; all others are parked until the scheduler hands the processor
//! back to them. Consequently, the code of a kernel thread observes the same
//! world it would on a real uniprocessor:
//!
//! - disabling interrupts (see [`InterruptGuard`]) is enough to make a
//!   sequence of operations atomic,
//! - a thread only loses the processor when it blocks, yields, or when a
//!   thread of strictly higher priority becomes runnable.
//!
//! Several kernel instances can run side by side in the same host process;
//! each test, for example, boots its own.
//!
//! ## Booting
//!
//! [`boot`] runs `main` as the first kernel thread and returns once the
//! kernel halts:
//!
//! ```rust
//! keos::boot(|| {
//!     let handle = keos::thread::ThreadBuilder::new("worker").spawn(|| {
//!         keos::println!("hello from a kernel thread");
//!     });
//!     assert_eq!(handle.join(), 0);
//! });
//! ```
//!
//! The kernel halts when
//! - the boot thread returns (power off),
//! - a kernel thread panics, in which case [`boot`] panics with the same
//!   message, or
//! - no thread is runnable while some are still blocked (deadlock), in which
//!   case [`boot`] panics with a message naming the blocked threads.
//!
//! [`Processor`]: thread::scheduler::Processor
//! [`InterruptGuard`]: interrupt::InterruptGuard
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate abyss;

pub mod interrupt;
pub mod sync;
pub mod thread;

pub use abyss::{debug, info, print, println, warning};
use log::LevelFilter;
use thread::{
    Priority,
    scheduler::{Halt, PriorityScheduler, Processor, Scheduler},
};

/// Enum representing errors that can occur during a kernel operation.
///
/// Misuse of the synchronization primitives is never reported through this
/// type; it is a fatal error that halts the kernel.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum KernelError {
    /// No such entry. (ENOENT)
    NoSuchEntry,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KernelError::NoSuchEntry => write!(f, "no such entry"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

impl std::error::Error for KernelError {}

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] struct provides an interface for
/// configuring a kernel instance before it boots: the scheduling policy, the
/// console verbosity, and the priority of the boot thread.
pub struct SystemConfigurationBuilder {
    pub(crate) scheduler: Box<dyn Scheduler>,
    pub(crate) quiet: bool,
    pub(crate) log_level: LevelFilter,
    pub(crate) main_priority: Priority,
}

impl SystemConfigurationBuilder {
    fn new() -> Self {
        Self {
            scheduler: Box::new(PriorityScheduler::new()),
            quiet: false,
            log_level: LevelFilter::Info,
            main_priority: Priority::DEFAULT,
        }
    }

    /// Sets the scheduler of the kernel instance.
    ///
    /// The default is the [`PriorityScheduler`].
    pub fn set_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    /// Suppresses the leveled console messages.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Sets the most verbose level printed on the console.
    pub fn log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    /// Sets the priority of the boot thread.
    pub fn main_priority(mut self, priority: Priority) -> Self {
        self.main_priority = priority;
        self
    }
}

/// Boots a kernel instance with the default configuration and runs `main` as
/// its first thread.
///
/// Returns when the kernel powers off.
///
/// # Panics
/// Panics if a kernel thread panics or if the kernel deadlocks.
pub fn boot(main: impl FnOnce() + Send + 'static) {
    boot_with(|conf| conf, main)
}

/// Boots a kernel instance configured by `config` and runs `main` as its first
/// thread.
///
/// # Panics
/// Panics if a kernel thread panics or if the kernel deadlocks.
pub fn boot_with(
    config: impl FnOnce(SystemConfigurationBuilder) -> SystemConfigurationBuilder,
    main: impl FnOnce() + Send + 'static,
) {
    let conf = config(SystemConfigurationBuilder::new());
    abyss::QUIET.store(conf.quiet, core::sync::atomic::Ordering::SeqCst);
    abyss::kprint::init(conf.log_level);

    match Processor::run(conf.scheduler, conf.main_priority, main) {
        Halt::PowerOff => debug!("kernel powered off"),
        Halt::Panic(msg) => panic!("{msg}"),
        Halt::Deadlock(parked) => panic!("deadlock: no runnable thread, parked: {parked}"),
    }
}

/// Whether the running thread is unwinding.
///
/// Used by drop handlers that must not raise a second panic while the kernel
/// halts or a thread exits.
pub fn panicking() -> bool {
    std::thread::panicking()
}
