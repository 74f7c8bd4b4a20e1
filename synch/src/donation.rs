//! Priority donation.
//!
//! When a thread is about to sleep on a lock held by a less urgent thread, it
//! lends its priority to the holder so that the holder runs, and releases the
//! lock, ahead of every thread of intermediate priority. If the holder is
//! itself asleep on another lock, the donation continues to that lock's
//! holder, and so on up the chain.
//!
//! The walk is breadth-first over `(holder, lock)` pairs. A thread never
//! waits for a lock it holds, so the chain has no cycle and the walk ends.
//!
//! Callers run both operations with interrupts disabled.
use alloc::{collections::VecDeque, sync::Arc};
use keos::thread::{Priority, Thread, donation::LockId};

/// Donates `priority` to `holder` through `lock`, and to everything `holder`
/// transitively waits for.
///
/// A holder already running at `priority` or above keeps its effective
/// priority, but the walk still continues past it.
pub(crate) fn propagate(priority: Priority, holder: Arc<Thread>, lock: LockId) {
    let mut queue = VecDeque::from([(holder, lock)]);

    while let Some((holder, lock)) = queue.pop_front() {
        donate(&holder, lock, priority);

        let waiting = holder.waiting.lock();
        for slot in waiting.iter() {
            if let Some(owner) = slot.owner() {
                queue.push_back((owner, slot.id()));
            }
        }
        waiting.unlock();
    }
}

/// Records `priority` as donated to `holder` through `lock`, raising `holder`
/// if it runs below it.
///
/// Also used when a lock changes hands: the new owner inherits the donation
/// of the threads still sleeping on the lock.
pub(crate) fn donate(holder: &Thread, lock: LockId, priority: Priority) {
    // One entry per lock: the largest donation made through it, recorded even
    // if it does not raise the holder right now.
    let mut ledger = holder.donations.lock();
    if ledger.get(lock).is_none_or(|donated| donated < priority) {
        ledger.donate(lock, priority);
    }
    ledger.unlock();

    if holder.priority() < priority {
        holder.set_effective_priority(priority);
        log::debug!(
            "donation: thread {} raised to {} through lock {}",
            holder.tid,
            priority,
            lock.into_u64()
        );
    }
}

/// Withdraws the donation `holder` received through `lock` and recomputes its
/// effective priority from its base priority and the donations it keeps.
pub(crate) fn revoke(holder: &Thread, lock: LockId) {
    let mut ledger = holder.donations.lock();
    let revoked = ledger.revoke(lock);
    ledger.unlock();

    if let Some(donated) = revoked {
        let restored = holder.refresh_priority();
        log::debug!(
            "donation: thread {} returns {} of lock {}, now at {}",
            holder.tid,
            donated,
            lock.into_u64(),
            restored
        );
    }
}
