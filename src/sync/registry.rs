//! Process-wide lock registry for lock debugging and fork safety.
//!
//! Every lock of the substrate registers itself here at construction, unless it was
//! created in the explicit fork-unsafe mode. The registry serves two purposes:
//!
//! - **Ownership tracking**: when lock debugging is enabled, each thread records which
//!   locks it holds so that `assert_locked` / `assert_unlocked` can validate the
//!   preconditions of the metadata operations built on top of the locks.
//! - **Fork safety**: [`LockRegistry::prepare_fork`] acquires every registered lock so that
//!   a forked child never inherits a half-mutated metadata structure, and
//!   [`LockRegistry::parent_after_fork`] / [`LockRegistry::child_after_fork`] release them.
//!
//! # Initialization
//!
//! The registry is created on first use with lock debugging enabled in debug builds. Call
//! [`LockRegistry::init`] before constructing any lock to pick the debug mode explicitly.
//! Entries are never removed; an entry whose lock has been dropped is skipped.

use std::{
    cell::RefCell,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, OnceLock, Weak,
    },
};

use strum::{AsRefStr, Display};

use crate::{Error, Result};

/// Identity of a registered lock.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(u64);

impl LockId {
    /// Returns the raw id value
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockId({})", self.0)
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock#{}", self.0)
    }
}

/// The three lock primitives of the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum LockKind {
    /// Exclusive mutex
    Mutex,
    /// Same-thread re-entrant mutex
    RecursiveMutex,
    /// Mutex plus condition variable
    Monitor,
}

/// A lock the registry can acquire and release around a fork.
pub(crate) trait ForkParticipant: Send + Sync {
    /// Acquire the lock without producing a guard.
    fn fork_acquire(&self);

    /// Release a lock previously taken by [`ForkParticipant::fork_acquire`].
    ///
    /// # Safety
    ///
    /// The lock must be held through a prior `fork_acquire` on the current thread.
    unsafe fn fork_release(&self);
}

impl<T: Send> ForkParticipant for parking_lot::Mutex<T> {
    fn fork_acquire(&self) {
        std::mem::forget(self.lock());
    }

    unsafe fn fork_release(&self) {
        self.force_unlock();
    }
}

impl<T: Send> ForkParticipant for parking_lot::ReentrantMutex<T> {
    fn fork_acquire(&self) {
        std::mem::forget(self.lock());
    }

    unsafe fn fork_release(&self) {
        self.force_unlock();
    }
}

struct LockEntry {
    id: LockId,
    kind: LockKind,
    name: &'static str,
    lock: Weak<dyn ForkParticipant>,
}

impl LockEntry {
    fn address(&self) -> usize {
        self.lock.as_ptr() as *const () as usize
    }
}

thread_local! {
    /// Locks held by the current thread, in acquisition order (debug tracking only)
    static HELD: RefCell<Vec<LockId>> = const { RefCell::new(Vec::new()) };
}

/// Process-wide table of all fork-safe locks.
pub struct LockRegistry {
    next_id: AtomicU64,
    debug: AtomicBool,
    entries: boxcar::Vec<LockEntry>,
    forked: parking_lot::Mutex<Vec<Arc<dyn ForkParticipant>>>,
}

static REGISTRY: OnceLock<LockRegistry> = OnceLock::new();

impl LockRegistry {
    fn new(debug: bool) -> Self {
        LockRegistry {
            next_id: AtomicU64::new(1),
            debug: AtomicBool::new(debug),
            entries: boxcar::Vec::new(),
            forked: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Initialize the process-wide registry with an explicit debug mode.
    ///
    /// If the registry already exists, only its debug mode is updated.
    pub fn init(debug: bool) -> &'static LockRegistry {
        let registry = REGISTRY.get_or_init(|| LockRegistry::new(debug));
        registry.set_debug(debug);
        registry
    }

    /// Access the process-wide registry, creating it on first use.
    pub fn global() -> &'static LockRegistry {
        REGISTRY.get_or_init(|| LockRegistry::new(cfg!(debug_assertions)))
    }

    /// Returns `true` if lock ownership is tracked.
    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Enable or disable lock ownership tracking.
    ///
    /// Toggling while locks are held is tolerated: releases of untracked locks are ignored.
    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    /// Number of locks ever registered (including dropped ones).
    #[must_use]
    pub fn registered(&self) -> usize {
        self.entries.count()
    }

    /// Returns `true` if `id` belongs to a lock registered for fork handling.
    #[must_use]
    pub fn is_registered(&self, id: LockId) -> bool {
        self.entries.iter().any(|(_, entry)| entry.id == id)
    }

    /// Hand out a fresh lock id without registering for fork handling.
    pub(crate) fn allocate_id(&self) -> LockId {
        LockId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a fork-safe lock.
    pub(crate) fn register(
        &self,
        kind: LockKind,
        name: &'static str,
        lock: Weak<dyn ForkParticipant>,
    ) -> LockId {
        let id = self.allocate_id();
        self.entries.push(LockEntry {
            id,
            kind,
            name,
            lock,
        });
        id
    }

    pub(crate) fn note_acquire(&self, id: LockId) {
        if !self.debug() {
            return;
        }

        HELD.with(|held| held.borrow_mut().push(id));
    }

    pub(crate) fn note_release(&self, id: LockId) {
        if !self.debug() {
            return;
        }

        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(position) = held.iter().rposition(|held_id| *held_id == id) {
                held.remove(position);
            }
        });
    }

    /// Returns `true` if the current thread holds `id`, as far as tracking knows.
    #[must_use]
    pub fn is_held(&self, id: LockId) -> bool {
        HELD.with(|held| held.borrow().contains(&id))
    }

    /// Number of tracked locks the current thread holds.
    #[must_use]
    pub fn held_count(&self) -> usize {
        HELD.with(|held| held.borrow().len())
    }

    pub(crate) fn assert_locked(&self, id: LockId, kind: LockKind, name: &str) {
        if self.debug() && !self.is_held(id) {
            tracing::error!(lock = %id, %kind, name, "lock not held");
            panic!("{} '{}' ({}) is not locked by this thread", kind, name, id);
        }
    }

    pub(crate) fn assert_unlocked(&self, id: LockId, kind: LockKind, name: &str) {
        if self.debug() && self.is_held(id) {
            tracing::error!(lock = %id, %kind, name, "lock unexpectedly held");
            panic!("{} '{}' ({}) is locked by this thread", kind, name, id);
        }
    }

    /// Acquire every live registered lock before a fork.
    ///
    /// Locks are taken in ascending address order, the same total order
    /// [`crate::sync::Mutex::lock_two`] uses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ForkUnsafe`] if lock debugging is enabled and the current thread
    /// already holds one of the registered locks; acquiring it again would deadlock.
    pub fn prepare_fork(&self) -> Result<()> {
        let mut live: Vec<(usize, &LockEntry, Arc<dyn ForkParticipant>)> = self
            .entries
            .iter()
            .filter_map(|(_, entry)| entry.lock.upgrade().map(|lock| (entry.address(), entry, lock)))
            .collect();

        if self.debug() {
            if let Some((_, entry, _)) = live.iter().find(|(_, entry, _)| self.is_held(entry.id)) {
                tracing::error!(lock = %entry.id, kind = %entry.kind, name = entry.name, "lock held across fork");
                return Err(Error::ForkUnsafe(entry.name.to_string()));
            }
        }

        live.sort_by_key(|(address, _, _)| *address);

        let mut forked = self.forked.lock();
        for (_, _, lock) in live {
            lock.fork_acquire();
            forked.push(lock);
        }

        tracing::debug!(locks = forked.len(), "fork prepared");
        Ok(())
    }

    /// Release the locks taken by [`LockRegistry::prepare_fork`] in the parent process.
    pub fn parent_after_fork(&self) {
        let released = self.release_forked();
        tracing::debug!(locks = released, "fork finished in parent");
    }

    /// Release the locks taken by [`LockRegistry::prepare_fork`] in the child process.
    ///
    /// The child has a single thread, the one that called `prepare_fork`, so every lock
    /// it inherited is held by that thread and can be released.
    pub fn child_after_fork(&self) {
        let released = self.release_forked();
        tracing::debug!(locks = released, "fork finished in child");
    }

    fn release_forked(&self) -> usize {
        let mut forked = self.forked.lock();
        let released = forked.len();
        for lock in forked.drain(..).rev() {
            // SAFETY: every entry was acquired by `prepare_fork` on this thread
            unsafe { lock.fork_release() };
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_id_display() {
        let id = LockId(7);
        assert_eq!(id.value(), 7);
        assert_eq!(format!("{}", id), "lock#7");
        assert_eq!(format!("{:?}", id), "LockId(7)");
        assert_eq!(LockKind::RecursiveMutex.as_ref(), "RecursiveMutex");
    }

    #[test]
    fn test_held_tracking() {
        let registry = LockRegistry::new(true);
        let id = registry.allocate_id();

        assert!(!registry.is_held(id));
        registry.note_acquire(id);
        registry.note_acquire(id);
        assert!(registry.is_held(id));

        registry.note_release(id);
        assert!(registry.is_held(id));
        registry.note_release(id);
        assert!(!registry.is_held(id));

        // Releasing an untracked lock is ignored
        registry.note_release(id);
        assert!(!registry.is_held(id));
    }

    #[test]
    fn test_tracking_disabled() {
        let registry = LockRegistry::new(false);
        let id = registry.allocate_id();
        registry.note_acquire(id);
        assert!(!registry.is_held(id));
        registry.assert_locked(id, LockKind::Mutex, "untracked");
    }

    #[test]
    #[should_panic(expected = "is not locked by this thread")]
    fn test_assert_locked_fails() {
        let registry = LockRegistry::new(true);
        let id = registry.allocate_id();
        registry.assert_locked(id, LockKind::Mutex, "test");
    }

    #[test]
    fn test_prepare_fork_and_release() {
        let registry = LockRegistry::new(true);
        let first = Arc::new(parking_lot::Mutex::new(1u32));
        let second = Arc::new(parking_lot::Mutex::new(2u32));

        let first_weak: Weak<dyn ForkParticipant> = Arc::downgrade(&first) as Weak<dyn ForkParticipant>;
        let second_weak: Weak<dyn ForkParticipant> = Arc::downgrade(&second) as Weak<dyn ForkParticipant>;
        registry.register(LockKind::Mutex, "first", first_weak);
        registry.register(LockKind::Mutex, "second", second_weak);

        registry.prepare_fork().unwrap();
        assert!(first.is_locked());
        assert!(second.is_locked());

        registry.child_after_fork();
        assert!(!first.is_locked());
        assert!(!second.is_locked());
    }

    #[test]
    fn test_prepare_fork_skips_dropped_locks() {
        let registry = LockRegistry::new(true);
        let kept = Arc::new(parking_lot::Mutex::new(()));
        {
            let dropped = Arc::new(parking_lot::Mutex::new(()));
            let weak: Weak<dyn ForkParticipant> = Arc::downgrade(&dropped) as Weak<dyn ForkParticipant>;
            registry.register(LockKind::Mutex, "dropped", weak);
        }
        let weak: Weak<dyn ForkParticipant> = Arc::downgrade(&kept) as Weak<dyn ForkParticipant>;
        registry.register(LockKind::Mutex, "kept", weak);

        registry.prepare_fork().unwrap();
        assert!(kept.is_locked());
        registry.parent_after_fork();
        assert!(!kept.is_locked());
        assert_eq!(registry.registered(), 2);
    }

    #[test]
    fn test_prepare_fork_rejects_held_lock() {
        let registry = LockRegistry::new(true);
        let lock = Arc::new(parking_lot::Mutex::new(()));
        let weak: Weak<dyn ForkParticipant> = Arc::downgrade(&lock) as Weak<dyn ForkParticipant>;
        let id = registry.register(LockKind::Mutex, "held", weak);

        registry.note_acquire(id);
        let result = registry.prepare_fork();
        assert!(matches!(result, Err(Error::ForkUnsafe(name)) if name == "held"));
        registry.note_release(id);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_unregistered_ids_are_skipped_by_fork() {
        let registry = LockRegistry::new(true);
        let exempt = registry.allocate_id();
        let lock = Arc::new(parking_lot::Mutex::new(()));
        let weak: Weak<dyn ForkParticipant> = Arc::downgrade(&lock) as Weak<dyn ForkParticipant>;
        let tracked = registry.register(LockKind::Monitor, "tracked", weak);

        assert!(!registry.is_registered(exempt));
        assert!(registry.is_registered(tracked));

        // Holding an exempt lock does not block the fork
        registry.note_acquire(exempt);
        registry.prepare_fork().unwrap();
        assert!(lock.is_locked());
        registry.parent_after_fork();
        registry.note_release(exempt);
    }
}
