//! Same-thread re-entrant mutex.

use std::{
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use crate::sync::registry::{ForkParticipant, LockId, LockKind, LockRegistry};

/// A mutex the owning thread may acquire repeatedly.
///
/// Each acquisition must be balanced by one release. Guards give shared access only;
/// wrap the value in a `Cell`/`RefCell` or atomics for mutation.
///
/// Guard-less acquisitions through [`RecursiveMutex::lock_raw`] are counted separately, and
/// [`RecursiveMutex::try_unlock`] only ever releases one of those.
pub struct RecursiveMutex<T> {
    inner: Arc<parking_lot::ReentrantMutex<T>>,
    // Only touched by the owning thread while it holds the lock
    raw_depth: AtomicUsize,
    id: LockId,
    name: &'static str,
    fork_safe: bool,
}

impl<T: Send + 'static> RecursiveMutex<T> {
    /// Create a new fork-safe recursive mutex.
    #[must_use]
    pub fn new(name: &'static str, value: T) -> Self {
        let inner = Arc::new(parking_lot::ReentrantMutex::new(value));
        let weak: Weak<dyn ForkParticipant> = Arc::downgrade(&inner) as Weak<dyn ForkParticipant>;
        let id = LockRegistry::global().register(LockKind::RecursiveMutex, name, weak);

        RecursiveMutex {
            inner,
            raw_depth: AtomicUsize::new(0),
            id,
            name,
            fork_safe: true,
        }
    }

    /// Create a recursive mutex which is exempt from fork handling.
    #[must_use]
    pub fn new_fork_unsafe(name: &'static str, value: T) -> Self {
        RecursiveMutex {
            inner: Arc::new(parking_lot::ReentrantMutex::new(value)),
            raw_depth: AtomicUsize::new(0),
            id: LockRegistry::global().allocate_id(),
            name,
            fork_safe: false,
        }
    }
}

impl<T> RecursiveMutex<T> {
    /// Acquire the lock, blocking unless the current thread already owns it.
    pub fn lock(&self) -> RecursiveGuard<'_, T> {
        let guard = self.inner.lock();
        LockRegistry::global().note_acquire(self.id);
        RecursiveGuard { guard, id: self.id }
    }

    /// Acquire the lock without a guard.
    ///
    /// Must be balanced by [`RecursiveMutex::try_unlock`] on the same thread.
    pub fn lock_raw(&self) {
        std::mem::forget(self.lock());
        self.raw_depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Release one level of a guard-less acquisition if the current thread owns the lock.
    ///
    /// Levels held through a [`RecursiveGuard`] are never released here.
    ///
    /// # Returns
    ///
    /// `true` if a level was released, `false` if the current thread did not own the lock
    /// or holds it only through guards.
    pub fn try_unlock(&self) -> bool {
        if !self.inner.is_owned_by_current_thread() {
            return false;
        }

        let depth = self.raw_depth.load(Ordering::Relaxed);
        if depth == 0 {
            return false;
        }
        self.raw_depth.store(depth - 1, Ordering::Relaxed);

        LockRegistry::global().note_release(self.id);
        // SAFETY: the current thread owns the lock and `raw_depth` counts the guards
        // forgotten by `lock_raw`, so one of its acquisitions is still outstanding.
        unsafe { self.inner.force_unlock() };
        true
    }

    /// Number of guard-less acquisitions outstanding on the owning thread
    #[must_use]
    pub fn raw_depth(&self) -> usize {
        self.raw_depth.load(Ordering::Relaxed)
    }

    /// Returns `true` if the current thread owns the lock.
    #[must_use]
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.inner.is_owned_by_current_thread()
    }

    /// Assert that the current thread owns the lock (lock debugging only).
    pub fn assert_locked(&self) {
        LockRegistry::global().assert_locked(self.id, LockKind::RecursiveMutex, self.name);
    }

    /// Assert that the current thread does not own the lock (lock debugging only).
    pub fn assert_unlocked(&self) {
        LockRegistry::global().assert_unlocked(self.id, LockKind::RecursiveMutex, self.name);
    }

    /// Returns `true` unless the mutex was created with [`RecursiveMutex::new_fork_unsafe`].
    #[must_use]
    pub fn is_fork_safe(&self) -> bool {
        self.fork_safe
    }

    /// The registry id of this mutex
    #[must_use]
    pub fn id(&self) -> LockId {
        self.id
    }
}

impl<T> fmt::Debug for RecursiveMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveMutex")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("locked", &self.inner.is_locked())
            .field("fork_safe", &self.fork_safe)
            .finish()
    }
}

/// RAII guard of a [`RecursiveMutex`]; releases one level on drop.
pub struct RecursiveGuard<'a, T> {
    guard: parking_lot::ReentrantMutexGuard<'a, T>,
    id: LockId,
}

impl<T> Deref for RecursiveGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Drop for RecursiveGuard<'_, T> {
    fn drop(&mut self) {
        LockRegistry::global().note_release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, sync::Arc, thread};

    use super::*;

    #[test]
    fn test_reentrant_lock() {
        let mutex = RecursiveMutex::new("recursive", Cell::new(0u32));

        let outer = mutex.lock();
        outer.set(outer.get() + 1);
        {
            let inner = mutex.lock();
            inner.set(inner.get() + 1);
        }
        assert!(mutex.is_owned_by_current_thread());
        drop(outer);

        assert!(!mutex.is_owned_by_current_thread());
        assert_eq!(mutex.lock().get(), 2);
    }

    #[test]
    fn test_lock_raw_and_try_unlock() {
        LockRegistry::init(true);
        let mutex = RecursiveMutex::new("raw", ());

        mutex.lock_raw();
        mutex.lock_raw();
        mutex.assert_locked();

        assert!(mutex.try_unlock());
        assert!(mutex.is_owned_by_current_thread());
        assert!(mutex.try_unlock());
        assert!(!mutex.is_owned_by_current_thread());

        // Not owned any more
        assert!(!mutex.try_unlock());
        mutex.assert_unlocked();
    }

    #[test]
    fn test_try_unlock_from_other_thread() {
        let mutex = Arc::new(RecursiveMutex::new("foreign", ()));
        mutex.lock_raw();

        let other = mutex.clone();
        let released = thread::spawn(move || other.try_unlock()).join().unwrap();
        assert!(!released);

        assert!(mutex.try_unlock());
    }

    #[test]
    fn test_try_unlock_leaves_guards_alone() {
        let mutex = RecursiveMutex::new("guarded", ());

        let guard = mutex.lock();
        assert!(!mutex.try_unlock());
        assert!(mutex.is_owned_by_current_thread());
        drop(guard);
        assert!(!mutex.is_owned_by_current_thread());

        // A raw level under a guard is released, the guard level is not
        let guard = mutex.lock();
        mutex.lock_raw();
        assert_eq!(mutex.raw_depth(), 1);
        assert!(mutex.try_unlock());
        assert!(!mutex.try_unlock());
        assert!(mutex.is_owned_by_current_thread());
        drop(guard);
        assert!(!mutex.is_owned_by_current_thread());
        assert!(mutex.inner.try_lock().is_some());
    }

    #[test]
    fn test_fork_unsafe_recursive_mutex() {
        let exempt = RecursiveMutex::new_fork_unsafe("exempt", ());
        assert!(!exempt.is_fork_safe());
        assert!(!LockRegistry::global().is_registered(exempt.id()));

        let tracked = RecursiveMutex::new("tracked", ());
        assert!(tracked.is_fork_safe());
        assert!(LockRegistry::global().is_registered(tracked.id()));

        exempt.lock_raw();
        assert!(exempt.try_unlock());
    }
}
