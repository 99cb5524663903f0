//! Mutex paired with a condition variable.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{Arc, Weak},
    time::Duration,
};

use crate::sync::registry::{ForkParticipant, LockId, LockKind, LockRegistry};

/// A monitor: mutual exclusion over `T` plus wait / notify.
///
/// Waiting is only possible through a [`MonitorGuard`], which guarantees the monitor is
/// held when [`MonitorGuard::wait`] is called.
///
/// # Examples
///
/// ```rust
/// use std::{sync::Arc, thread};
/// use objcore::sync::Monitor;
///
/// let monitor = Arc::new(Monitor::new("ready", false));
/// let signaller = monitor.clone();
///
/// let handle = thread::spawn(move || {
///     *signaller.enter() = true;
///     signaller.notify_all();
/// });
///
/// let mut ready = monitor.enter();
/// while !*ready {
///     ready.wait();
/// }
/// handle.join().unwrap();
/// ```
pub struct Monitor<T> {
    inner: Arc<parking_lot::Mutex<T>>,
    cond: parking_lot::Condvar,
    id: LockId,
    name: &'static str,
    fork_safe: bool,
}

impl<T: Send + 'static> Monitor<T> {
    /// Create a new fork-safe monitor.
    #[must_use]
    pub fn new(name: &'static str, value: T) -> Self {
        let inner = Arc::new(parking_lot::Mutex::new(value));
        let weak: Weak<dyn ForkParticipant> = Arc::downgrade(&inner) as Weak<dyn ForkParticipant>;
        let id = LockRegistry::global().register(LockKind::Monitor, name, weak);

        Monitor {
            inner,
            cond: parking_lot::Condvar::new(),
            id,
            name,
            fork_safe: true,
        }
    }

    /// Create a monitor which is exempt from fork handling.
    #[must_use]
    pub fn new_fork_unsafe(name: &'static str, value: T) -> Self {
        Monitor {
            inner: Arc::new(parking_lot::Mutex::new(value)),
            cond: parking_lot::Condvar::new(),
            id: LockRegistry::global().allocate_id(),
            name,
            fork_safe: false,
        }
    }
}

impl<T> Monitor<T> {
    /// Enter the monitor, blocking until it is available.
    pub fn enter(&self) -> MonitorGuard<'_, T> {
        let guard = self.inner.lock();
        LockRegistry::global().note_acquire(self.id);
        MonitorGuard {
            monitor: self,
            guard,
        }
    }

    /// Attempt to enter the monitor without blocking.
    pub fn try_enter(&self) -> Option<MonitorGuard<'_, T>> {
        let guard = self.inner.try_lock()?;
        LockRegistry::global().note_acquire(self.id);
        Some(MonitorGuard {
            monitor: self,
            guard,
        })
    }

    /// Wake one waiter.
    pub fn notify(&self) {
        self.cond.notify_one();
    }

    /// Wake all waiters.
    pub fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Assert that the current thread is inside the monitor (lock debugging only).
    pub fn assert_locked(&self) {
        LockRegistry::global().assert_locked(self.id, LockKind::Monitor, self.name);
    }

    /// Assert that the current thread is not inside the monitor (lock debugging only).
    pub fn assert_unlocked(&self) {
        LockRegistry::global().assert_unlocked(self.id, LockKind::Monitor, self.name);
    }

    /// Returns `true` unless the monitor was created with [`Monitor::new_fork_unsafe`].
    #[must_use]
    pub fn is_fork_safe(&self) -> bool {
        self.fork_safe
    }

    /// The registry id of this monitor
    #[must_use]
    pub fn id(&self) -> LockId {
        self.id
    }
}

impl<T> fmt::Debug for Monitor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("locked", &self.inner.is_locked())
            .field("fork_safe", &self.fork_safe)
            .finish()
    }
}

/// Proof of being inside a [`Monitor`]; leaves the monitor on drop.
pub struct MonitorGuard<'a, T> {
    monitor: &'a Monitor<T>,
    guard: parking_lot::MutexGuard<'a, T>,
}

impl<T> MonitorGuard<'_, T> {
    /// Release the monitor, block until notified, then re-enter.
    ///
    /// Spurious wakeups are possible; wait in a loop on the guarded condition.
    pub fn wait(&mut self) {
        self.monitor.cond.wait(&mut self.guard);
    }

    /// Like [`MonitorGuard::wait`] with an upper bound on the blocking time.
    ///
    /// # Returns
    ///
    /// `true` if the wait timed out.
    pub fn wait_for(&mut self, timeout: Duration) -> bool {
        self.monitor
            .cond
            .wait_for(&mut self.guard, timeout)
            .timed_out()
    }

    /// Wake one waiter while still inside the monitor.
    pub fn notify(&self) {
        self.monitor.notify();
    }

    /// Wake all waiters while still inside the monitor.
    pub fn notify_all(&self) {
        self.monitor.notify_all();
    }
}

impl<T> Deref for MonitorGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for MonitorGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for MonitorGuard<'_, T> {
    fn drop(&mut self) {
        LockRegistry::global().note_release(self.monitor.id);
    }
}
