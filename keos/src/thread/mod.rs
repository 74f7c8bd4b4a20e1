//! Thread abstraction.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with its own
//! stack and local state. Exactly one of them runs at a time; the others are
//! either waiting in the scheduler's queue ([`ThreadState::Runnable`]) or
//! blocked until someone unparks them ([`ThreadState::Parked`]).
//!
//! Every thread carries two priorities:
//! - the *base* priority, which the thread sets for itself with
//!   [`Current::set_priority`], and
//! - the *effective* priority, which the scheduler uses. It equals the base
//!   priority unless other threads donated a higher one to it while waiting
//!   for a lock it holds.
//!
//! The donations themselves are recorded on the thread (see [`donation`]);
//! the effective priority is always `max(base, highest donation)` once the
//! donor stops waiting.
//!
//! ## Blocking
//!
//! The only way to block is [`Current::park_with`]. It hands a [`ParkHandle`]
//! of the running thread to a closure, which typically stores it in a wait
//! queue, and then gives up the processor. Whoever later owns the handle can
//! wake the thread with [`ParkHandle::unpark`].
pub mod donation;
pub mod scheduler;

use crate::{KernelError, sync::SpinLock};
use abyss::interrupt::{InterruptGuard, in_interrupt_context};
use crossbeam_utils::sync::{Parker, Unparker};
use donation::{DonationLedger, PendingAcquisitions};
use scheduler::{Processor, processor};
use std::{
    cell::OnceCell,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

/// Identifier of a thread, unique within the host process.
pub type Tid = u64;

/// The lowest priority.
pub const PRI_MIN: u8 = 0;
/// The priority of a thread unless configured otherwise.
pub const PRI_DEFAULT: u8 = 31;
/// The highest priority.
pub const PRI_MAX: u8 = 63;

/// A scheduling priority in `[PRI_MIN, PRI_MAX]`. Larger is more urgent.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Priority(u8);

impl Priority {
    /// The lowest priority.
    pub const MIN: Self = Self(PRI_MIN);
    /// The default priority.
    pub const DEFAULT: Self = Self(PRI_DEFAULT);
    /// The highest priority.
    pub const MAX: Self = Self(PRI_MAX);

    /// Creates a priority.
    ///
    /// # Errors
    /// [`KernelError::InvalidArgument`] if `value` exceeds [`PRI_MAX`].
    pub fn new(value: u8) -> Result<Self, KernelError> {
        if value <= PRI_MAX {
            Ok(Self(value))
        } else {
            Err(KernelError::InvalidArgument)
        }
    }

    /// The numeric value of the priority.
    pub fn into_u8(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl core::fmt::Display for Priority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread is exited with exitcode.
    Exited(i32),
    /// Thread is parked.
    Parked,
}

/// A thread abstraction.
pub struct Thread {
    /// Thread id
    pub tid: Tid,
    /// Thread name
    pub name: String,
    state: SpinLock<ThreadState>,
    base_priority: AtomicU8,
    priority: AtomicU8,
    /// Priorities donated to this thread, keyed by lock.
    pub donations: SpinLock<DonationLedger>,
    /// Locks this thread is blocked on.
    pub waiting: SpinLock<PendingAcquisitions>,
    joiners: SpinLock<Vec<ParkHandle>>,
    unparker: Unparker,
}

impl Thread {
    fn new(name: String, priority: Priority, unparker: Unparker) -> Self {
        static TID: AtomicU64 = AtomicU64::new(1);
        Self {
            tid: TID.fetch_add(1, Ordering::SeqCst),
            name,
            state: SpinLock::new(ThreadState::Parked),
            base_priority: AtomicU8::new(priority.0),
            priority: AtomicU8::new(priority.0),
            donations: SpinLock::new(DonationLedger::new()),
            waiting: SpinLock::new(PendingAcquisitions::new()),
            joiners: SpinLock::new(Vec::new()),
            unparker,
        }
    }

    /// The state of the thread.
    pub fn state(&self) -> ThreadState {
        let guard = self.state.lock();
        let state = *guard;
        guard.unlock();
        state
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        let mut guard = self.state.lock();
        *guard = state;
        guard.unlock();
    }

    /// The effective priority of the thread.
    pub fn priority(&self) -> Priority {
        Priority(self.priority.load(Ordering::SeqCst))
    }

    /// The base priority of the thread.
    pub fn base_priority(&self) -> Priority {
        Priority(self.base_priority.load(Ordering::SeqCst))
    }

    /// Overwrites the effective priority.
    ///
    /// Used by priority donation. The scheduler observes the new value the
    /// next time it selects a thread.
    pub fn set_effective_priority(&self, priority: Priority) {
        self.priority.store(priority.0, Ordering::SeqCst);
    }

    /// Recomputes the effective priority as the maximum of the base priority
    /// and every donation still recorded, and returns it.
    pub fn refresh_priority(&self) -> Priority {
        let ledger = self.donations.lock();
        let donated = ledger.highest();
        ledger.unlock();

        let base = self.base_priority();
        let priority = donated.map_or(base, |donated| donated.max(base));
        self.set_effective_priority(priority);
        priority
    }

    fn set_base_priority(&self, priority: Priority) {
        self.base_priority.store(priority.0, Ordering::SeqCst);
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("priority", &self.priority())
            .field("base_priority", &self.base_priority())
            .finish()
    }
}

/// The unwinding payload of [`Current::exit`].
pub(crate) struct ExitCode(pub(crate) i32);

/// What ties a host thread to the kernel thread it executes.
pub(crate) struct Binding {
    pub(crate) thread: Arc<Thread>,
    pub(crate) processor: Arc<Processor>,
    pub(crate) parker: Parker,
}

thread_local! {
    static BINDING: OnceCell<Binding> = const { OnceCell::new() };
}

pub(crate) fn bind(binding: Binding) {
    BINDING.with(|b| {
        if b.set(binding).is_err() {
            panic!("Host thread is already bound to a kernel thread.");
        }
    })
}

pub(crate) fn with_binding<R>(f: impl FnOnce(&Binding) -> R) -> R {
    BINDING.with(|b| match b.get() {
        Some(binding) => f(binding),
        None => panic!("Not running on a kernel thread. Call this inside `keos::boot`."),
    })
}

/// Get specified thread's [`ThreadState`] by TID (Thread ID).
///
/// # Errors
/// [`KernelError::NoSuchEntry`] if no live thread of the running kernel has
/// the given id.
pub fn get_state_by_tid(tid: Tid) -> Result<ThreadState, KernelError> {
    processor()
        .thread_by_tid(tid)
        .map(|th| th.state())
        .ok_or(KernelError::NoSuchEntry)
}

/// A handle to join thread.
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: Tid,
    th: Arc<Thread>,
}

impl JoinHandle {
    /// The underlying thread.
    pub fn thread(&self) -> &Arc<Thread> {
        &self.th
    }

    /// Join this handle and returns exit code.
    ///
    /// Blocks until the thread exits.
    pub fn join(self) -> i32 {
        assert_ne!(
            self.tid,
            Current::get_tid(),
            "JoinHandle::join: a thread cannot join itself"
        );
        let _guard = InterruptGuard::new();
        loop {
            if let ThreadState::Exited(code) = self.th.state() {
                return code;
            }
            Current::park_with(|handle| {
                let mut joiners = self.th.joiners.lock();
                joiners.push(handle);
                joiners.unlock();
            });
        }
    }
}

/// A handle that represent the parked thread.
pub struct ParkHandle {
    th: Arc<Thread>,
}

impl ParkHandle {
    /// The parked thread.
    pub fn thread(&self) -> &Arc<Thread> {
        &self.th
    }

    /// The effective priority of the parked thread.
    pub fn priority(&self) -> Priority {
        self.th.priority()
    }

    /// Consume the handle and unpark the underlying thread.
    ///
    /// The thread becomes runnable; the caller keeps the processor. See
    /// [`Processor::preempt`] to yield to it when it is more urgent.
    pub fn unpark(self) {
        processor().unblock(self.th);
    }
}

/// The opaque structure indicating the running thread on the current cpu.
pub struct Current {
    _p: (),
}

impl Current {
    /// Run a function `f` with [`ParkHandle`] for current thread, and then park
    /// the current thread.
    ///
    /// `f` runs with interrupts disabled, so nothing can unpark the thread
    /// before it actually blocks. The thread returns from this function once
    /// the handle is unparked, with the interrupt level it had on entry.
    ///
    /// # Panics
    /// Panics if called inside an interrupt handler.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        assert!(
            !in_interrupt_context(),
            "Current::park_with: cannot block inside an interrupt handler"
        );
        let _guard = InterruptGuard::new();
        let (th, processor) = with_binding(|b| (b.thread.clone(), b.processor.clone()));
        th.set_state(ThreadState::Parked);
        f(ParkHandle { th });
        processor.reschedule();
    }

    /// Exit the current thread with `exit_code`.
    ///
    /// The stack of the thread is unwound; joiners observe `exit_code`.
    pub fn exit(exit_code: i32) -> ! {
        assert!(
            !in_interrupt_context(),
            "Current::exit: cannot exit inside an interrupt handler"
        );
        std::panic::resume_unwind(Box::new(ExitCode(exit_code)))
    }

    /// Get the current thread's id.
    pub fn get_tid() -> Tid {
        with_binding(|b| b.thread.tid)
    }

    /// The running thread.
    pub fn thread() -> Arc<Thread> {
        with_binding(|b| b.thread.clone())
    }

    /// The effective priority of the running thread.
    pub fn priority() -> Priority {
        with_binding(|b| b.thread.priority())
    }

    /// The base priority of the running thread.
    pub fn base_priority() -> Priority {
        with_binding(|b| b.thread.base_priority())
    }

    /// Sets the base priority of the running thread.
    ///
    /// Donations the thread currently holds stay in effect, so the effective
    /// priority never drops below the highest of them. Yields if a runnable
    /// thread is now more urgent.
    pub fn set_priority(priority: Priority) {
        let (th, processor) = with_binding(|b| (b.thread.clone(), b.processor.clone()));
        let guard = InterruptGuard::new();
        th.set_base_priority(priority);
        let effective = th.refresh_priority();
        drop(guard);
        debug!(
            "thread {} set base priority {}, effective {}",
            th.tid, priority, effective
        );
        processor.preempt();
    }

    /// Gives up the processor to the next runnable thread.
    pub fn yield_now() {
        processor().yield_now();
    }
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    name: String,
    priority: Priority,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
            priority: Priority::DEFAULT,
        }
    }

    /// Sets the base priority of the thread.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Spawn the thread.
    ///
    /// The caller yields right away if the new thread is more urgent.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> JoinHandle {
        let processor = processor();
        let th = processor.spawn(self.name, self.priority, thread_fn);
        let handle = JoinHandle {
            tid: th.tid,
            th,
        };
        processor.preempt();
        handle
    }
}
