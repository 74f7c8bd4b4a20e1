//! Interrupt
//!
//! The processor exposes its interrupt flag through the [`InterruptController`]
//! capability. Every host thread that executes kernel code is bound to the
//! controller of the processor it runs on (see [`bind`]); the free functions
//! and [`InterruptGuard`] of this module always act on that binding.
//!
//! Host threads that are not bound to any processor are never interrupted:
//! they observe [`InterruptState::On`], and guards created on them are inert.
use core::{
    cell::RefCell,
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::Arc;

/// Enumeration representing the interrupt state.
#[derive(PartialEq, Eq, Debug, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum InterruptState {
    /// Interrupts are disabled.
    Off = 0,
    /// Interrupts are enabled.
    On = 1,
}

/// The capability of controlling a processor's interrupt level.
///
/// The synchronization layer never touches the interrupt flag directly; it
/// only opens [`InterruptGuard`]s, which go through the controller bound to
/// the running host thread. A different backend (e.g. a real `cli`/`sti`
/// pair, or a spinlock on a hosted SMP machine) only needs to implement this
/// trait.
pub trait InterruptController: Send + Sync {
    /// Reads the current interrupt level.
    fn level(&self) -> InterruptState;

    /// Sets the interrupt level, returning the previous one.
    fn set_level(&self, level: InterruptState) -> InterruptState;

    /// Whether the processor is executing an interrupt handler.
    fn in_handler(&self) -> bool;

    /// Marks the entry of an interrupt handler.
    ///
    /// Interrupts are disabled for the duration of the handler.
    fn enter_handler(&self);

    /// Marks the end of an interrupt handler, re-enabling interrupts.
    fn leave_handler(&self);
}

/// A hosted uniprocessor.
///
/// Only one host thread runs on a [`Cpu`] at a time, so the plain atomic flags
/// are the whole of its state.
pub struct Cpu {
    level: AtomicU8,
    in_handler: AtomicBool,
}

impl Cpu {
    /// Creates a processor with interrupts disabled, as it is at boot.
    pub const fn new() -> Self {
        Self {
            level: AtomicU8::new(InterruptState::Off as u8),
            in_handler: AtomicBool::new(false),
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController for Cpu {
    fn level(&self) -> InterruptState {
        InterruptState::try_from(self.level.load(Ordering::SeqCst))
            .unwrap_or(InterruptState::Off)
    }

    fn set_level(&self, level: InterruptState) -> InterruptState {
        let prev = self.level.swap(level.into(), Ordering::SeqCst);
        InterruptState::try_from(prev).unwrap_or(InterruptState::Off)
    }

    fn in_handler(&self) -> bool {
        self.in_handler.load(Ordering::SeqCst)
    }

    fn enter_handler(&self) {
        let prev = self.set_level(InterruptState::Off);
        assert_eq!(
            prev,
            InterruptState::On,
            "Interrupt delivered while interrupts are disabled."
        );
        let nested = self.in_handler.swap(true, Ordering::SeqCst);
        assert!(!nested, "Nested interrupt handler.");
    }

    fn leave_handler(&self) {
        let was = self.in_handler.swap(false, Ordering::SeqCst);
        assert!(was, "Mismatched interrupt handler exit.");
        self.set_level(InterruptState::On);
    }
}

thread_local! {
    static CONTROLLER: RefCell<Option<Arc<dyn InterruptController>>> = const { RefCell::new(None) };
}

/// Binds the running host thread to `controller`.
///
/// Called once by the kernel when a host thread starts executing a kernel
/// thread.
pub fn bind(controller: Arc<dyn InterruptController>) {
    CONTROLLER.with(|c| *c.borrow_mut() = Some(controller));
}

/// Runs `f` with the controller bound to the running host thread, if any.
pub fn with_controller<R>(f: impl FnOnce(&dyn InterruptController) -> R) -> Option<R> {
    CONTROLLER.with(|c| c.borrow().as_deref().map(f))
}

/// Whether the running code is an interrupt handler.
pub fn in_interrupt_context() -> bool {
    with_controller(|c| c.in_handler()).unwrap_or(false)
}

impl InterruptState {
    /// Reads the current interrupt state.
    ///
    /// # Returns
    /// - [`InterruptState::On`] if interrupts are enabled.
    /// - [`InterruptState::Off`] if interrupts are disabled.
    pub fn current() -> Self {
        with_controller(|c| c.level()).unwrap_or(InterruptState::On)
    }

    /// Enables interrupts.
    ///
    /// # Safety
    /// Enabling interrupts inside a critical section breaks the atomicity of
    /// the section. Prefer dropping the [`InterruptGuard`] that opened it.
    pub unsafe fn enable() {
        with_controller(|c| c.set_level(InterruptState::On));
    }

    /// Disables interrupts, returning the previous state.
    ///
    /// # Safety
    /// The caller is responsible for restoring the previous state.
    pub unsafe fn disable() -> InterruptState {
        with_controller(|c| c.set_level(InterruptState::Off)).unwrap_or(InterruptState::On)
    }
}

/// An RAII-based guard for managing interrupt disabling.
///
/// The guard is the critical section of a uniprocessor kernel: while it is
/// alive, the running thread cannot be interrupted, and thus cannot be
/// preempted. On drop, the interrupt state that was active when the guard was
/// created is restored, on every exit path of the enclosing scope.
///
/// A thread may block while holding a guard. The next thread resumes with
/// interrupts disabled and restores its own saved state when its own guard is
/// dropped; when the blocked thread is resumed later, its guard is still in
/// effect.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation** to prevent unintended interrupt state changes.
/// - Due to Rust's ownership and scoping rules, this invariant is naturally
///   upheld unless `drop()` is explicitly called prematurely or an
///   [`InterruptGuard`] is stored in a struct field.
///
/// This structure is created using [`InterruptGuard::new`].
pub struct InterruptGuard {
    previous: InterruptState,
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Creates a new `InterruptGuard`, disabling interrupts.
    ///
    /// # Example
    /// ```rust
    /// use abyss::interrupt::InterruptGuard;
    ///
    /// let _guard = InterruptGuard::new(); // Disables interrupts
    /// // Critical section...
    /// // Interrupts are restored when `_guard` goes out of scope.
    /// ```
    pub fn new() -> Self {
        let previous = unsafe { InterruptState::disable() };
        core::sync::atomic::fence(Ordering::SeqCst);
        Self {
            previous,
            _not_send: PhantomData,
        }
    }

    /// The interrupt state this guard restores on drop.
    pub fn previous(&self) -> InterruptState {
        self.previous
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        core::sync::atomic::fence(Ordering::SeqCst);
        if self.previous == InterruptState::On {
            unsafe { InterruptState::enable() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound() -> Arc<Cpu> {
        let cpu = Arc::new(Cpu::new());
        bind(cpu.clone());
        unsafe { InterruptState::enable() };
        cpu
    }

    #[test]
    fn guard_restores_previous_level() {
        let cpu = bound();
        {
            let outer = InterruptGuard::new();
            assert_eq!(outer.previous(), InterruptState::On);
            {
                let inner = InterruptGuard::new();
                assert_eq!(inner.previous(), InterruptState::Off);
            }
            assert_eq!(cpu.level(), InterruptState::Off);
        }
        assert_eq!(cpu.level(), InterruptState::On);
    }

    #[test]
    fn handler_context_masks_interrupts() {
        let cpu = bound();
        assert!(!in_interrupt_context());
        cpu.enter_handler();
        assert!(in_interrupt_context());
        assert_eq!(InterruptState::current(), InterruptState::Off);
        cpu.leave_handler();
        assert!(!in_interrupt_context());
        assert_eq!(InterruptState::current(), InterruptState::On);
    }

    #[test]
    fn unbound_threads_are_never_masked() {
        std::thread::spawn(|| {
            let guard = InterruptGuard::new();
            assert_eq!(guard.previous(), InterruptState::On);
            assert_eq!(InterruptState::current(), InterruptState::On);
            assert!(!in_interrupt_context());
        })
        .join()
        .unwrap();
    }
}
