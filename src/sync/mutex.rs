//! Exclusive mutex with ownership assertions and address-ordered pair locking.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{Arc, Weak},
};

use crate::sync::registry::{ForkParticipant, LockId, LockKind, LockRegistry};

/// Exclusive, non-recursive lock protecting a value of type `T`.
///
/// Built on `parking_lot::Mutex`. Unless created with [`Mutex::new_fork_unsafe`], every
/// mutex is registered with the [`LockRegistry`] and participates in fork handling.
///
/// # Examples
///
/// ```rust
/// use objcore::sync::Mutex;
///
/// let left = Mutex::new("left", 1);
/// let right = Mutex::new("right", 2);
///
/// let mut pair = Mutex::lock_two(&left, &right);
/// *pair.first() += 10;
/// *pair.second() += 20;
/// drop(pair);
///
/// assert_eq!(*left.lock(), 11);
/// assert_eq!(*right.lock(), 22);
/// ```
pub struct Mutex<T> {
    inner: Arc<parking_lot::Mutex<T>>,
    id: LockId,
    name: &'static str,
    fork_safe: bool,
}

impl<T: Send + 'static> Mutex<T> {
    /// Create a new fork-safe mutex.
    ///
    /// # Arguments
    ///
    /// * `name` - Diagnostic name used in lock debugging output
    /// * `value` - The protected value
    #[must_use]
    pub fn new(name: &'static str, value: T) -> Self {
        let inner = Arc::new(parking_lot::Mutex::new(value));
        let weak: Weak<dyn ForkParticipant> = Arc::downgrade(&inner) as Weak<dyn ForkParticipant>;
        let id = LockRegistry::global().register(LockKind::Mutex, name, weak);

        Mutex {
            inner,
            id,
            name,
            fork_safe: true,
        }
    }

    /// Create a mutex which is exempt from fork handling.
    ///
    /// The fork handlers never acquire it, so the child may observe it in any state.
    #[must_use]
    pub fn new_fork_unsafe(name: &'static str, value: T) -> Self {
        Mutex {
            inner: Arc::new(parking_lot::Mutex::new(value)),
            id: LockRegistry::global().allocate_id(),
            name,
            fork_safe: false,
        }
    }
}

impl<T> Mutex<T> {
    /// Block until the lock is acquired.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let guard = self.inner.lock();
        LockRegistry::global().note_acquire(self.id);
        MutexGuard { guard, id: self.id }
    }

    /// Attempt to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let guard = self.inner.try_lock()?;
        LockRegistry::global().note_acquire(self.id);
        Some(MutexGuard { guard, id: self.id })
    }

    /// Acquire the lock only if `should_lock` is set.
    ///
    /// Used by code paths that are entered both with and without the lock already held by
    /// an outer frame.
    pub fn lock_with(&self, should_lock: bool) -> Option<MutexGuard<'_, T>> {
        if should_lock {
            Some(self.lock())
        } else {
            None
        }
    }

    /// Acquire two mutexes without risk of lock-order inversion.
    ///
    /// The mutexes are always taken in ascending address order, so two threads calling
    /// `lock_two(a, b)` and `lock_two(b, a)` concurrently cannot deadlock. Passing the same
    /// mutex twice acquires it once.
    ///
    /// # Arguments
    ///
    /// * `first` - The mutex reachable through [`LockedPair::first`]
    /// * `second` - The mutex reachable through [`LockedPair::second`]
    ///
    /// # Returns
    ///
    /// A [`LockedPair`] which releases both mutexes when dropped.
    pub fn lock_two<'a>(first: &'a Mutex<T>, second: &'a Mutex<T>) -> LockedPair<'a, T> {
        if Arc::ptr_eq(&first.inner, &second.inner) {
            return LockedPair {
                first: first.lock(),
                second: None,
            };
        }

        if first.address() < second.address() {
            let first_guard = first.lock();
            let second_guard = second.lock();
            LockedPair {
                first: first_guard,
                second: Some(second_guard),
            }
        } else {
            let second_guard = second.lock();
            let first_guard = first.lock();
            LockedPair {
                first: first_guard,
                second: Some(second_guard),
            }
        }
    }

    /// Assert that the current thread holds this mutex (lock debugging only).
    pub fn assert_locked(&self) {
        LockRegistry::global().assert_locked(self.id, LockKind::Mutex, self.name);
    }

    /// Assert that the current thread does not hold this mutex (lock debugging only).
    pub fn assert_unlocked(&self) {
        LockRegistry::global().assert_unlocked(self.id, LockKind::Mutex, self.name);
    }

    /// Returns `true` if any thread currently holds the mutex.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Returns `true` unless the mutex was created with [`Mutex::new_fork_unsafe`].
    #[must_use]
    pub fn is_fork_safe(&self) -> bool {
        self.fork_safe
    }

    /// The registry id of this mutex
    #[must_use]
    pub fn id(&self) -> LockId {
        self.id
    }

    /// The diagnostic name of this mutex
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl<T: Default + Send + 'static> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new("anonymous", T::default())
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .field("fork_safe", &self.fork_safe)
            .finish()
    }
}

/// RAII guard of a [`Mutex`]; the lock is released on drop.
pub struct MutexGuard<'a, T> {
    guard: parking_lot::MutexGuard<'a, T>,
    id: LockId,
}

impl<T> MutexGuard<'_, T> {
    /// The id of the mutex this guard holds
    #[must_use]
    pub fn lock_id(&self) -> LockId {
        self.id
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        LockRegistry::global().note_release(self.id);
    }
}

/// Two mutexes held together, produced by [`Mutex::lock_two`].
///
/// Dropping the pair releases both.
pub struct LockedPair<'a, T> {
    first: MutexGuard<'a, T>,
    second: Option<MutexGuard<'a, T>>,
}

impl<T> LockedPair<'_, T> {
    /// Returns `true` if both arguments of `lock_two` were the same mutex.
    #[must_use]
    pub fn is_same(&self) -> bool {
        self.second.is_none()
    }

    /// The value behind the first mutex.
    pub fn first(&mut self) -> &mut T {
        &mut *self.first
    }

    /// The value behind the second mutex (the first one if they are the same).
    pub fn second(&mut self) -> &mut T {
        match self.second.as_mut() {
            Some(second) => &mut **second,
            None => &mut *self.first,
        }
    }

    /// Both values at once; `None` for the second if both arguments were the same mutex.
    pub fn both(&mut self) -> (&mut T, Option<&mut T>) {
        (&mut *self.first, self.second.as_deref_mut())
    }
}
