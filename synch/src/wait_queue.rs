//! Priority-ordered wait queue shared by the primitives.
use alloc::collections::VecDeque;
use keos::thread::{ParkHandle, Priority};

/// Index of the entry with the highest priority; the earliest one wins ties.
pub(crate) fn highest<T>(entries: &VecDeque<T>, priority: impl Fn(&T) -> Priority) -> Option<usize> {
    let mut best: Option<(usize, Priority)> = None;
    for (idx, entry) in entries.iter().enumerate() {
        let p = priority(entry);
        if best.is_none_or(|(_, top)| p > top) {
            best = Some((idx, p));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Parked threads, woken most urgent first.
///
/// Priorities are read when a thread is popped, not when it is pushed: a
/// waiter that received a donation while queued is ordered by it.
pub(crate) struct WaitQueue {
    waiters: VecDeque<ParkHandle>,
}

impl WaitQueue {
    pub(crate) const fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, handle: ParkHandle) {
        self.waiters.push_back(handle);
    }

    pub(crate) fn pop_highest(&mut self) -> Option<ParkHandle> {
        let idx = highest(&self.waiters, ParkHandle::priority)?;
        self.waiters.remove(idx)
    }

    /// The effective priority of the most urgent waiter.
    pub(crate) fn highest_priority(&self) -> Option<Priority> {
        self.waiters.iter().map(ParkHandle::priority).max()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(v: u8) -> Priority {
        Priority::new(v).unwrap()
    }

    #[test]
    fn highest_prefers_the_earliest_among_equals() {
        let entries: VecDeque<(char, Priority)> =
            [('a', p(1)), ('b', p(5)), ('c', p(3)), ('d', p(5))].into();
        assert_eq!(highest(&entries, |e| e.1), Some(1));
        assert_eq!(highest(&VecDeque::<(char, Priority)>::new(), |e| e.1), None);
    }
}
