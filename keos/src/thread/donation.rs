//! Per-thread bookkeeping of priority donation.
//!
//! Each [`Thread`] owns two records that the sleeping locks of the kernel
//! maintain on its behalf:
//!
//! - a [`DonationLedger`]: the priorities other threads donated to it, keyed by
//!   the lock through which they were donated. Keying by [`LockId`] makes
//!   "one donation per lock" a structural property: donating again through
//!   the same lock updates the entry in place.
//! - a [`PendingAcquisitions`] slab: the locks the thread is currently
//!   blocked on, each as a shared [`OwnerSlot`] so that a donation can follow
//!   the chain of holders.
//!
//! The records are only mutated with interrupts disabled.
//!
//! [`Thread`]: super::Thread

use super::{Priority, Thread, Tid};
use crate::sync::SpinLock;
use arrayvec::ArrayVec;
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Maximum number of locks a single thread can be waiting for at once.
pub const MAX_PENDING_ACQUISITIONS: usize = 8;

/// Identity of a sleeping lock.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct LockId(u64);

impl LockId {
    /// Allocates a fresh, never reused, lock identity.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::SeqCst))
    }

    /// The raw identifier.
    pub fn into_u64(self) -> u64 {
        self.0
    }
}

impl Default for LockId {
    fn default() -> Self {
        Self::new()
    }
}

/// The owner cell of a sleeping lock.
///
/// The slot is shared between the lock itself and the pending-acquisition
/// records of its waiters, which read it to find the thread to donate to.
pub struct OwnerSlot {
    id: LockId,
    owner: SpinLock<Option<Arc<Thread>>>,
}

impl OwnerSlot {
    /// Creates a slot of a free lock.
    pub fn new() -> Self {
        Self {
            id: LockId::new(),
            owner: SpinLock::new(None),
        }
    }

    /// Identity of the lock.
    pub fn id(&self) -> LockId {
        self.id
    }

    /// The thread currently owning the lock.
    pub fn owner(&self) -> Option<Arc<Thread>> {
        let guard = self.owner.lock();
        let owner = guard.clone();
        guard.unlock();
        owner
    }

    /// Replaces the owner of the lock.
    pub fn set_owner(&self, owner: Option<Arc<Thread>>) {
        let mut guard = self.owner.lock();
        *guard = owner;
        guard.unlock();
    }

    /// Whether the lock is owned by the thread `tid`.
    pub fn is_owned_by(&self, tid: Tid) -> bool {
        let guard = self.owner.lock();
        let result = guard.as_ref().is_some_and(|th| th.tid == tid);
        guard.unlock();
        result
    }
}

impl Default for OwnerSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Priorities donated to a thread, keyed by the lock they were donated
/// through.
#[derive(Default, Debug)]
pub struct DonationLedger {
    donations: BTreeMap<LockId, Priority>,
}

impl DonationLedger {
    /// Creates an empty ledger.
    pub const fn new() -> Self {
        Self {
            donations: BTreeMap::new(),
        }
    }

    /// Records `priority` as donated through `lock`, returning the donation it
    /// replaces.
    pub fn donate(&mut self, lock: LockId, priority: Priority) -> Option<Priority> {
        self.donations.insert(lock, priority)
    }

    /// Removes the donation made through `lock`.
    pub fn revoke(&mut self, lock: LockId) -> Option<Priority> {
        self.donations.remove(&lock)
    }

    /// The donation made through `lock`.
    pub fn get(&self, lock: LockId) -> Option<Priority> {
        self.donations.get(&lock).copied()
    }

    /// The highest priority donated through any lock.
    pub fn highest(&self) -> Option<Priority> {
        self.donations.values().copied().max()
    }

    /// Number of locks the thread holds a donation through.
    pub fn len(&self) -> usize {
        self.donations.len()
    }

    /// Whether no donation is recorded.
    pub fn is_empty(&self) -> bool {
        self.donations.is_empty()
    }
}

/// The locks a thread is blocked on, in a fixed-capacity slab.
#[derive(Default)]
pub struct PendingAcquisitions {
    slots: ArrayVec<Arc<OwnerSlot>, MAX_PENDING_ACQUISITIONS>,
}

impl PendingAcquisitions {
    /// Creates an empty list.
    pub const fn new() -> Self {
        Self {
            slots: ArrayVec::new_const(),
        }
    }

    /// Records the intent to acquire the lock of `slot`.
    ///
    /// # Panics
    /// Panics if the slab is exhausted.
    pub fn record(&mut self, slot: Arc<OwnerSlot>) {
        if self.slots.iter().any(|s| s.id() == slot.id()) {
            return;
        }
        if self.slots.try_push(slot).is_err() {
            panic!(
                "Pending-acquisition slab exhausted ({} entries).",
                MAX_PENDING_ACQUISITIONS
            );
        }
    }

    /// Drops the record of `lock`, returning whether one existed.
    pub fn forget(&mut self, lock: LockId) -> bool {
        match self.slots.iter().position(|s| s.id() == lock) {
            Some(idx) => {
                self.slots.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    /// Iterates over the locks being waited for.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<OwnerSlot>> {
        self.slots.iter()
    }

    /// Number of locks being waited for.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the thread waits for no lock.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(v: u8) -> Priority {
        Priority::new(v).unwrap()
    }

    #[test]
    fn ledger_keeps_one_entry_per_lock() {
        let (a, b) = (LockId::new(), LockId::new());
        let mut ledger = DonationLedger::new();
        assert_eq!(ledger.donate(a, p(5)), None);
        assert_eq!(ledger.donate(a, p(7)), Some(p(5)));
        ledger.donate(b, p(3));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.highest(), Some(p(7)));

        assert_eq!(ledger.revoke(a), Some(p(7)));
        assert_eq!(ledger.highest(), Some(p(3)));
        assert_eq!(ledger.revoke(a), None);
        ledger.revoke(b);
        assert!(ledger.is_empty());
        assert_eq!(ledger.highest(), None);
    }

    #[test]
    fn pending_records_are_deduplicated() {
        let slot = Arc::new(OwnerSlot::new());
        let mut pending = PendingAcquisitions::new();
        pending.record(slot.clone());
        pending.record(slot.clone());
        assert_eq!(pending.len(), 1);
        assert!(pending.forget(slot.id()));
        assert!(!pending.forget(slot.id()));
        assert!(pending.is_empty());
    }

    #[test]
    #[should_panic(expected = "slab exhausted")]
    fn pending_slab_is_bounded() {
        let mut pending = PendingAcquisitions::new();
        for _ in 0..=MAX_PENDING_ACQUISITIONS {
            pending.record(Arc::new(OwnerSlot::new()));
        }
    }
}
