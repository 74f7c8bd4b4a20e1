//! Thread scheduler and the processor it runs on.
//!
//! The [`Scheduler`] decides *which* runnable thread gets the processor; the
//! [`Processor`] performs the switch. The scheduler only ever sees runnable
//! threads: a thread enters its queue through [`Processor::unblock`] (or a
//! yield) and leaves it when it is selected by [`Scheduler::next_to_run`].
//!
//! ## Context switch
//!
//! A switch always happens with interrupts disabled. The outgoing thread
//! hands the processor to the next one and waits until it is handed back;
//! the interrupt level that the outgoing thread saved stays saved on its own
//! stack, inside its `InterruptGuard`, and is restored when that guard is
//! dropped after the thread resumes.
//!
//! ## Preemption
//!
//! There is no timer. The running thread only loses the processor when it
//! blocks, yields, or when [`Processor::preempt`] finds a runnable thread of
//! strictly higher priority. Preemption is requested by every operation that
//! can make a more urgent thread runnable or lower the running thread's
//! priority. Inside an interrupt handler the yield is deferred until the
//! handler returns; with interrupts disabled it does not happen at all.
use super::{Binding, ExitCode, Priority, Thread, ThreadState, Tid, bind, with_binding};
use crate::{interrupt::InterruptTable, sync::SpinLock};
use abyss::interrupt::{Cpu, InterruptGuard, InterruptState, in_interrupt_context};
use crossbeam_utils::sync::{Parker, Unparker};
use std::{
    any::Any,
    collections::{BTreeMap, VecDeque},
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

/// A trait for a thread scheduler.
///
/// The [`Scheduler`] trait defines the common functionality expected from a
/// thread scheduler: holding the runnable threads and determining which
/// thread to run next.
///
/// This trait can be implemented by different types of schedulers, such as
/// FIFO, Priority-based, or Multi-level Queue schedulers.
pub trait Scheduler: Send + Sync {
    /// Pop the next thread to run.
    ///
    /// Returns `None` if no thread is runnable.
    fn next_to_run(&self) -> Option<Arc<Thread>>;

    /// Push a thread `th` into scheduling queue.
    fn push_to_queue(&self, th: Arc<Thread>);

    /// The effective priority of the thread [`next_to_run`] would return.
    ///
    /// [`next_to_run`]: Scheduler::next_to_run
    fn next_priority(&self) -> Option<Priority>;
}

/// A First-in-first-out scheduler.
#[derive(Default)]
pub struct Fifo {
    runqueue: SpinLock<VecDeque<Arc<Thread>>>,
}

impl Fifo {
    /// Creates an empty scheduler.
    pub const fn new() -> Self {
        Self {
            runqueue: SpinLock::new(VecDeque::new()),
        }
    }
}

impl Scheduler for Fifo {
    fn next_to_run(&self) -> Option<Arc<Thread>> {
        let mut guard = self.runqueue.lock();
        let val = guard.pop_front();
        guard.unlock();
        val
    }

    fn push_to_queue(&self, th: Arc<Thread>) {
        let mut guard = self.runqueue.lock();
        guard.push_back(th);
        guard.unlock();
    }

    fn next_priority(&self) -> Option<Priority> {
        let guard = self.runqueue.lock();
        let val = guard.front().map(|th| th.priority());
        guard.unlock();
        val
    }
}

/// A strict priority scheduler.
///
/// Always selects the runnable thread with the highest effective priority,
/// FIFO among equals. Priorities are read at selection time, so a donation
/// to a thread already in the queue takes effect immediately.
#[derive(Default)]
pub struct PriorityScheduler {
    runqueue: SpinLock<VecDeque<Arc<Thread>>>,
}

impl PriorityScheduler {
    /// Creates an empty scheduler.
    pub const fn new() -> Self {
        Self {
            runqueue: SpinLock::new(VecDeque::new()),
        }
    }

    fn highest(queue: &VecDeque<Arc<Thread>>) -> Option<(usize, Priority)> {
        let mut best: Option<(usize, Priority)> = None;
        for (idx, th) in queue.iter().enumerate() {
            let priority = th.priority();
            if best.is_none_or(|(_, top)| priority > top) {
                best = Some((idx, priority));
            }
        }
        best
    }
}

impl Scheduler for PriorityScheduler {
    fn next_to_run(&self) -> Option<Arc<Thread>> {
        let mut guard = self.runqueue.lock();
        let val = Self::highest(&guard).and_then(|(idx, _)| guard.remove(idx));
        guard.unlock();
        val
    }

    fn push_to_queue(&self, th: Arc<Thread>) {
        let mut guard = self.runqueue.lock();
        guard.push_back(th);
        guard.unlock();
    }

    fn next_priority(&self) -> Option<Priority> {
        let guard = self.runqueue.lock();
        let val = Self::highest(&guard).map(|(_, priority)| priority);
        guard.unlock();
        val
    }
}

/// Why a kernel instance stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// The boot thread returned.
    PowerOff,
    /// A kernel thread panicked with the message.
    Panic(String),
    /// No thread was runnable; the parked threads are listed.
    Deadlock(String),
}

/// The unwinding payload that stops a thread of a halted kernel.
struct Halted;

/// The processor of a kernel instance.
pub struct Processor {
    cpu: Arc<Cpu>,
    scheduler: Box<dyn Scheduler>,
    threads: SpinLock<BTreeMap<Tid, Arc<Thread>>>,
    running: AtomicU64,
    boot_tid: AtomicU64,
    yield_on_return: AtomicBool,
    pub(crate) interrupts: InterruptTable,
    halted: AtomicBool,
    halt: SpinLock<Option<Halt>>,
    host: Unparker,
    hosts: SpinLock<Vec<std::thread::JoinHandle<()>>>,
}

/// Get the processor the running thread executes on.
///
/// # Panics
/// Panics when not called from a kernel thread.
pub fn processor() -> Arc<Processor> {
    with_binding(|b| b.processor.clone())
}

fn current() -> Arc<Thread> {
    with_binding(|b| b.thread.clone())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        String::from(*msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        String::from("kernel thread panicked")
    }
}

impl Processor {
    /// Boots a processor, runs `main` on it, and waits until it halts.
    pub(crate) fn run(
        scheduler: Box<dyn Scheduler>,
        priority: Priority,
        main: impl FnOnce() + Send + 'static,
    ) -> Halt {
        let host = Parker::new();
        let processor = Arc::new(Processor {
            cpu: Arc::new(Cpu::new()),
            scheduler,
            threads: SpinLock::new(BTreeMap::new()),
            running: AtomicU64::new(0),
            boot_tid: AtomicU64::new(0),
            yield_on_return: AtomicBool::new(false),
            interrupts: InterruptTable::new(),
            halted: AtomicBool::new(false),
            halt: SpinLock::new(None),
            host: host.unparker().clone(),
            hosts: SpinLock::new(Vec::new()),
        });

        let boot = processor.spawn(String::from("main"), priority, main);
        processor.boot_tid.store(boot.tid, Ordering::SeqCst);
        drop(boot);
        info!("Kernel: booting on a hosted uniprocessor.");
        if let Some(first) = processor.scheduler.next_to_run() {
            processor.switch_to(first);
        }

        let reason = loop {
            if processor.halted.load(Ordering::SeqCst) {
                let mut halt = processor.halt.lock();
                let reason = halt.take();
                halt.unlock();
                break reason.unwrap_or(Halt::PowerOff);
            }
            host.park();
        };

        let mut hosts = processor.hosts.lock();
        let hosts_to_join = core::mem::take(&mut *hosts);
        hosts.unlock();
        for h in hosts_to_join {
            let _ = h.join();
        }
        reason
    }

    /// Creates a thread and makes it runnable.
    pub(crate) fn spawn<F: FnOnce() + Send + 'static>(
        self: &Arc<Self>,
        name: String,
        priority: Priority,
        thread_fn: F,
    ) -> Arc<Thread> {
        let parker = Parker::new();
        let th = Arc::new(Thread::new(name, priority, parker.unparker().clone()));

        let mut threads = self.threads.lock();
        threads.insert(th.tid, th.clone());
        threads.unlock();

        let host = {
            let (processor, th) = (self.clone(), th.clone());
            std::thread::Builder::new()
                .name(th.name.clone())
                .spawn(move || processor.start_thread(th, parker, thread_fn))
        };
        match host {
            Ok(host) => {
                let mut hosts = self.hosts.lock();
                hosts.push(host);
                hosts.unlock();
            }
            Err(e) => panic!("Failed to create a host thread for {}: {e}", th.name),
        }

        debug!(
            "Thread: spawned {} (tid {}) at priority {}",
            th.name,
            th.tid,
            th.priority()
        );
        self.unblock(th.clone());
        th
    }

    /// The very beginning of a thread.
    fn start_thread<F: FnOnce()>(self: Arc<Self>, th: Arc<Thread>, parker: Parker, thread_fn: F) {
        abyss::interrupt::bind(self.cpu.clone());
        let tid = th.tid;
        bind(Binding {
            thread: th,
            processor: self.clone(),
            parker,
        });

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.wait_for_cpu(tid);
            // New threads start with interrupts enabled.
            unsafe { InterruptState::enable() };
            thread_fn();
        }));

        let code = match result {
            Ok(()) => 0,
            Err(payload) if payload.is::<Halted>() => return,
            Err(payload) => match payload.downcast::<ExitCode>() {
                Ok(code) => code.0,
                Err(payload) => {
                    self.halt(Halt::Panic(panic_message(&*payload)));
                    return;
                }
            },
        };
        self.exit_current(code);
    }

    /// Blocks the host thread until the processor is handed to `tid`.
    fn wait_for_cpu(&self, tid: Tid) {
        with_binding(|b| {
            loop {
                if self.halted.load(Ordering::SeqCst) {
                    panic::resume_unwind(Box::new(Halted));
                }
                if self.running.load(Ordering::SeqCst) == tid {
                    return;
                }
                b.parker.park();
            }
        })
    }

    fn switch_to(&self, next: Arc<Thread>) {
        next.set_state(ThreadState::Running);
        self.running.store(next.tid, Ordering::SeqCst);
        next.unparker.unpark();
    }

    /// Hands the processor to the next thread.
    ///
    /// The caller has disabled interrupts and already moved the running thread
    /// out of [`ThreadState::Running`]. Returns once the running thread is
    /// selected again; an exiting thread returns right after the switch.
    pub(crate) fn reschedule(&self) {
        assert_eq!(
            InterruptState::current(),
            InterruptState::Off,
            "Processor::reschedule: interrupts must be disabled"
        );
        let current = current();
        let exiting = matches!(current.state(), ThreadState::Exited(_));

        match self.scheduler.next_to_run() {
            Some(next) if next.tid == current.tid => current.set_state(ThreadState::Running),
            Some(next) => {
                self.switch_to(next);
                if !exiting {
                    self.wait_for_cpu(current.tid);
                }
            }
            None => {
                let parked = self.describe_parked();
                self.halt(Halt::Deadlock(parked));
                if !exiting {
                    panic::resume_unwind(Box::new(Halted));
                }
            }
        }
    }

    /// Makes a parked thread runnable.
    ///
    /// The running thread keeps the processor.
    pub fn unblock(&self, th: Arc<Thread>) {
        let guard = InterruptGuard::new();
        let state = th.state();
        assert_eq!(
            state,
            ThreadState::Parked,
            "Processor::unblock: {} is not parked",
            th.name
        );
        th.set_state(ThreadState::Runnable);
        self.scheduler.push_to_queue(th);
        drop(guard);
    }

    /// Yields if a runnable thread is more urgent than the running one.
    pub fn preempt(&self) {
        let Some(next) = self.scheduler.next_priority() else {
            return;
        };
        if next <= current().priority() {
            return;
        }
        if in_interrupt_context() {
            self.yield_on_return.store(true, Ordering::SeqCst);
        } else if InterruptState::current() == InterruptState::On {
            self.yield_now();
        }
    }

    /// Gives up the processor to the next runnable thread, which may be the
    /// running thread itself.
    pub fn yield_now(&self) {
        assert!(
            !in_interrupt_context(),
            "Processor::yield_now: cannot yield inside an interrupt handler"
        );
        let guard = InterruptGuard::new();
        let current = current();
        current.set_state(ThreadState::Runnable);
        self.scheduler.push_to_queue(current);
        self.reschedule();
        drop(guard);
    }

    /// Consumes a pending yield request of an interrupt handler.
    pub(crate) fn take_yield_on_return(&self) -> bool {
        self.yield_on_return.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub(crate) fn thread_by_tid(&self, tid: Tid) -> Option<Arc<Thread>> {
        let threads = self.threads.lock();
        let th = threads.get(&tid).cloned();
        threads.unlock();
        th
    }

    fn exit_current(&self, code: i32) {
        let guard = InterruptGuard::new();
        let th = current();
        th.set_state(ThreadState::Exited(code));

        let mut threads = self.threads.lock();
        threads.remove(&th.tid);
        threads.unlock();

        let mut joiners = th.joiners.lock();
        let to_wake = core::mem::take(&mut *joiners);
        joiners.unlock();
        for joiner in to_wake {
            self.unblock(joiner.th);
        }
        debug!("Thread: {} (tid {}) exited with {}", th.name, th.tid, code);

        if th.tid == self.boot_tid.load(Ordering::SeqCst) {
            self.halt(Halt::PowerOff);
        } else {
            self.reschedule();
        }
        // The processor now belongs to another thread; its interrupt level is
        // not ours to restore.
        core::mem::forget(guard);
    }

    fn describe_parked(&self) -> String {
        let threads = self.threads.lock();
        let parked = threads
            .values()
            .filter(|th| th.state() == ThreadState::Parked)
            .map(|th| format!("{} (tid {})", th.name, th.tid))
            .collect::<Vec<_>>();
        threads.unlock();
        parked.join(", ")
    }

    /// Stops the kernel instance.
    ///
    /// The first reason wins. Every thread is released and unwinds quietly.
    fn halt(&self, reason: Halt) {
        match &reason {
            Halt::PowerOff => info!("Kernel: power off."),
            Halt::Panic(msg) => warning!("Kernel: panicked: {msg}"),
            Halt::Deadlock(parked) => warning!("Kernel: deadlock, parked: {parked}"),
        }
        let mut halt = self.halt.lock();
        if halt.is_none() {
            *halt = Some(reason);
        }
        halt.unlock();
        self.halted.store(true, Ordering::SeqCst);

        let threads = self.threads.lock();
        for th in threads.values() {
            th.unparker.unpark();
        }
        threads.unlock();
        self.host.unpark();
    }
}
