//! Interrupt management.
//!
//! Interrupts are delivered synchronously: [`raise`] runs the registered
//! handler on the running thread, as if the device had fired between two
//! instructions. While the handler runs, interrupts are disabled and
//! [`in_interrupt_context`] is true, so blocking primitives refuse to run.
use crate::{sync::SpinLock, thread::scheduler::processor};
use abyss::interrupt::{InterruptController, with_controller};
use std::sync::Arc;

pub use abyss::interrupt::{InterruptGuard, InterruptState, in_interrupt_context};

type Handler = Option<Arc<dyn Fn(usize) + Send + Sync>>;

/// Handlers of the external interrupt vectors `32..256`.
pub(crate) struct InterruptTable {
    handlers: [SpinLock<Handler>; 224],
}

impl InterruptTable {
    pub(crate) fn new() -> Self {
        Self {
            handlers: core::array::from_fn(|_| SpinLock::new(None)),
        }
    }

    fn slot(&self, vec: usize) -> &SpinLock<Handler> {
        match vec.checked_sub(32).and_then(|idx| self.handlers.get(idx)) {
            Some(slot) => slot,
            None => panic!("Invalid interrupt vector #{vec}"),
        }
    }

    fn get(&self, vec: usize) -> Handler {
        let guard = self.slot(vec).lock();
        let handler = guard.clone();
        guard.unlock();
        handler
    }
}

/// Register the interrupt handler
///
/// The handler receives the vector number.
///
/// # Panics
/// Panics if `vec` is not in `32..256`.
pub fn register(vec: usize, handler: impl Fn(usize) + Send + Sync + 'static) {
    let processor = processor();
    let mut guard = processor.interrupts.slot(vec).lock();
    *guard = Some(Arc::new(handler));
    guard.unlock();
}

/// Raises the interrupt `vec` on the processor of the running thread.
///
/// Returns `false`, without running the handler, if interrupts are disabled.
/// If the handler made a more urgent thread runnable, the running thread
/// yields once the handler returns.
///
/// # Panics
/// Panics if no handler is registered for `vec`.
pub fn raise(vec: usize) -> bool {
    let processor = processor();
    let Some(handler) = processor.interrupts.get(vec) else {
        panic!("Unknown interrupt #{vec}");
    };
    let cpu = processor.cpu();
    if cpu.level() == InterruptState::Off {
        return false;
    }

    cpu.enter_handler();
    handler(vec);
    cpu.leave_handler();

    if processor.take_yield_on_return() {
        processor.yield_now();
    }
    true
}

/// Whether interrupts are enabled on the running thread's processor.
pub fn enabled() -> bool {
    with_controller(|c| c.level() == InterruptState::On).unwrap_or(true)
}
