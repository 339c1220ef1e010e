//! A fiber-aware mutex built on the scheduler's lock hand-off.
//!
//! Unlocking with waiters queued never releases the lock: ownership passes
//! straight to the oldest live waiter, so a woken fiber owns the lock the
//! moment it resumes. If that fiber dies before resuming, the lock moves on
//! to the next waiter, or is left for the next `try_lock` to reclaim.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::error;

use crate::error::Result;
use crate::handle::Handle;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a lock in the scheduler's wait-queue table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(u64);

impl LockId {
    /// A process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock#{}", self.0)
    }
}

pub struct Mutex<T: ?Sized> {
    id: LockId,
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// The guard is the only way to reach `data`, and at most one guard exists.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            id: LockId::next(),
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn id(&self) -> LockId {
        self.id
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Takes the lock if it is free, or if its last recipient died before
    /// taking it.
    pub fn try_lock<'a>(&'a self, handle: &'a Handle) -> Option<MutexGuard<'a, T>> {
        let acquired = self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
            || handle.reclaim_orphaned(self.id);
        acquired.then(|| MutexGuard::new(self, handle))
    }

    /// Acquires the lock, suspending the running fiber while it is held.
    pub async fn lock<'a>(&'a self, handle: &'a Handle) -> Result<MutexGuard<'a, T>> {
        if let Some(guard) = self.try_lock(handle) {
            return Ok(guard);
        }
        // `locked` stays set across the hand-off; the unlocking fiber
        // transferred ownership to us.
        handle.wait_mutex(self.id).await?;
        Ok(MutexGuard::new(self, handle))
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock(&self, handle: &Handle) {
        while handle.waiters(self.id) > 0 {
            match handle.notify_mutex(self.id) {
                Ok(Some(_)) => return,
                Ok(None) => continue,
                Err(e) if std::thread::panicking() => {
                    error!("unlocking {} while panicking: {e}", self.id);
                    break;
                }
                Err(e) => panic!("unlocking {}: {e}", self.id),
            }
        }
        self.locked.store(false, Ordering::Release);
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("id", &self.id)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    handle: &'a Handle,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    fn new(mutex: &'a Mutex<T>, handle: &'a Handle) -> Self {
        Self {
            mutex,
            handle,
            _marker: PhantomData,
        }
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
        self.mutex.unlock(self.handle);
    }
}
