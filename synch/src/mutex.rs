//! # Mutex.
//!
//! A [`Mutex`] couples a [`Lock`] with the data it protects: the data can
//! only be reached through the [`MutexGuard`] returned by [`Mutex::lock`].
//! Waiting threads sleep, and take part in priority donation exactly like
//! users of a bare [`Lock`].
//!
//! As with the spinlock, a guard does not unlock on drop. It must be released
//! with [`MutexGuard::unlock`]; dropping it is a fatal error.
use crate::lock::Lock;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};
use keos::sync::WouldBlock;

/// A mutual exclusion primitive useful for protecting shared data
///
/// This mutex will block threads waiting for the lock to become available.
/// The data can only be accessed through the guards returned from [`lock`]
/// and [`try_lock`], which guarantees that the data is only ever accessed
/// when the mutex is locked.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
///
/// # Examples
///
/// ```
/// let data = Arc::new(Mutex::new(0));
/// let worker = {
///     let data = data.clone();
///     ThreadBuilder::new("work").spawn(move || {
///         let mut data = data.lock();
///         *data += 1;
///         // the lock must be "explicitly" unlocked.
///         data.unlock();
///     })
/// };
/// worker.join();
/// ```
pub struct Mutex<T: ?Sized> {
    lock: Lock,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    pub fn new(t: T) -> Mutex<T> {
        Mutex {
            lock: Lock::new(),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires a mutex, blocking the current thread until it is able to do
    /// so.
    ///
    /// # Panics
    /// Panics if the current thread already holds the mutex, or inside an
    /// interrupt handler.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.lock.acquire();
        MutexGuard { mutex: self }
    }

    /// Attempts to acquire this lock.
    ///
    /// This function does not block.
    ///
    /// # Errors
    ///
    /// If the mutex could not be acquired because it is already locked, then
    /// this call will return the [`WouldBlock`] error.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        if self.lock.try_acquire() {
            Ok(MutexGuard { mutex: self })
        } else {
            Err(WouldBlock)
        }
    }

    /// The [`Lock`] underneath, for pairing with a
    /// [`ConditionVariable`](crate::ConditionVariable).
    pub fn raw(&self) -> &Lock {
        &self.lock
    }
}

impl<T: Default> Default for Mutex<T> {
    /// Creates a `Mutex<T>`, with the `Default` value for T.
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a mutex. When this structure
/// is dropped (falls out of scope) without unlocking, the panic occurs.
///
/// The lock must be explicitly unlocked by [`unlock`] method.
///
/// [`unlock`]: MutexGuard::unlock
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    mutex: &'a Mutex<T>,
}

unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    /// Releases the underlying [`Mutex`].
    pub fn unlock(self) {
        self.mutex.lock.release();
        core::mem::forget(self);
    }

    /// The [`Lock`] underneath the guarded mutex.
    pub fn raw(&self) -> &'a Lock {
        &self.mutex.lock
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if keos::panicking() {
            return;
        }
        panic!("`.unlock()` must be explicitly called for MutexGuard.");
    }
}
