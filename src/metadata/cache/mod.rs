//! The per-class inline method cache.
//!
//! An open-addressed hash table from [`Selector`] to [`Imp`], consulted on every method
//! dispatch. Reads take no lock; writes happen only with the owning class's lock held.
//!
//! # Key Components
//!
//! - [`MethodCache`] - The cache itself: [`MethodCache::find`], [`MethodCache::insert`],
//!   [`MethodCache::reset`]
//! - [`Reclaimer`] / [`EpochGuard`] - Deferred freeing of replaced bucket arrays
//! - [`Atomicity`] - Whether an insert targets a published or a private bucket array
//!
//! # Probing
//!
//! The home bucket of a selector is its value masked by `capacity - 1`; collisions probe
//! linearly with wrap-around. A selector value of `0` marks an empty bucket and ends every
//! probe sequence. The load factor of [`CachePolicy`] keeps at least one empty bucket in
//! every array, so a probe that cycles through all buckets means the cache is corrupt, which
//! is fatal.
//!
//! # Concurrency
//!
//! The writer stores a bucket's implementation before its selector (release), and the
//! reader loads the selector (acquire) before the implementation, so a matching selector is
//! never paired with a missing implementation. Growth and reset build a new array privately,
//! publish it with one pointer swap and retire the old array to the [`Reclaimer`]; a
//! published array only ever gains entries.

mod reclaim;

pub use reclaim::{EpochGuard, Reclaimer};

use std::{
    fmt,
    sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

use crate::{
    config::CachePolicy,
    metadata::selector::{Imp, Selector},
};

/// Selector value of an empty bucket
const EMPTY: u32 = 0;

/// Visibility requirements of a bucket write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Atomicity {
    /// The array is published; lock-free readers may be probing it
    Atomic,
    /// The array is private to the writer and published later
    NotAtomic,
}

struct Bucket {
    sel: AtomicU32,
    imp: AtomicUsize,
}

struct BucketArray {
    buckets: Box<[Bucket]>,
    mask: u32,
}

impl BucketArray {
    fn new(capacity: u32) -> Box<Self> {
        debug_assert!(capacity.is_power_of_two());
        let buckets = (0..capacity)
            .map(|_| Bucket {
                sel: AtomicU32::new(EMPTY),
                imp: AtomicUsize::new(0),
            })
            .collect();

        Box::new(BucketArray {
            buckets,
            mask: capacity - 1,
        })
    }

    fn capacity(&self) -> u32 {
        self.mask + 1
    }

    fn bucket(&self, index: u32) -> &Bucket {
        &self.buckets[(index & self.mask) as usize]
    }

    fn home(&self, sel: u32) -> u32 {
        sel & self.mask
    }

    fn find(&self, sel: Selector) -> Option<Imp> {
        let sel = sel.value();
        let mut index = self.home(sel);

        for _ in 0..self.capacity() {
            let bucket = self.bucket(index);
            let current = bucket.sel.load(Ordering::Acquire);
            if current == sel {
                return Imp::new(bucket.imp.load(Ordering::Relaxed));
            }
            if current == EMPTY {
                return None;
            }
            index = index.wrapping_add(1) & self.mask;
        }

        fatal!(
            "Method cache corrupted. selector={} capacity={} - probe found no empty bucket",
            sel,
            self.capacity()
        )
    }

    /// Returns `true` if a new bucket was occupied, `false` if `sel` was already present.
    fn insert(&self, sel: Selector, imp: Imp, atomicity: Atomicity) -> bool {
        let sel = sel.value();
        let mut index = self.home(sel);

        for _ in 0..self.capacity() {
            let bucket = self.bucket(index);
            let current = bucket.sel.load(Ordering::Acquire);

            if current == sel {
                bucket.imp.store(imp.value(), Ordering::Release);
                return false;
            }

            if current == EMPTY {
                match atomicity {
                    Atomicity::Atomic => {
                        bucket.imp.store(imp.value(), Ordering::Relaxed);
                        bucket.sel.store(sel, Ordering::Release);
                    }
                    Atomicity::NotAtomic => {
                        bucket.imp.store(imp.value(), Ordering::Relaxed);
                        bucket.sel.store(sel, Ordering::Relaxed);
                    }
                }
                return true;
            }

            index = index.wrapping_add(1) & self.mask;
        }

        fatal!(
            "Method cache corrupted. selector={} capacity={} - insert found no empty bucket",
            sel,
            self.capacity()
        )
    }

    fn entries(&self) -> impl Iterator<Item = (Selector, Imp)> + '_ {
        self.buckets.iter().filter_map(|bucket| {
            let sel = bucket.sel.load(Ordering::Acquire);
            if sel == EMPTY {
                return None;
            }
            let imp = Imp::new(bucket.imp.load(Ordering::Relaxed))?;
            Some((Selector::from_raw(sel)?, imp))
        })
    }
}

/// Per-class selector to implementation cache.
///
/// # Examples
///
/// ```rust
/// use objcore::metadata::cache::{Atomicity, MethodCache, Reclaimer};
/// use objcore::{CachePolicy, Imp, Selector};
///
/// let policy = CachePolicy::default();
/// let reclaimer = Reclaimer::default();
/// let cache = MethodCache::new(&policy);
/// let sel = Selector::intern("count");
///
/// // Writers hold the owning class's lock
/// cache.insert(sel, Imp::new(0x100).unwrap(), Atomicity::Atomic, &policy, &reclaimer);
///
/// let guard = reclaimer.pin();
/// assert_eq!(cache.find(sel, &guard), Imp::new(0x100));
/// ```
pub struct MethodCache {
    buckets: AtomicPtr<BucketArray>,
    occupied: AtomicU32,
    generation: AtomicU64,
    writer: parking_lot::Mutex<()>,
}

impl MethodCache {
    /// Create an empty cache with the policy's initial capacity.
    #[must_use]
    pub fn new(policy: &CachePolicy) -> Self {
        MethodCache {
            buckets: AtomicPtr::new(Box::into_raw(BucketArray::new(policy.initial_capacity))),
            occupied: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            writer: parking_lot::Mutex::new(()),
        }
    }

    fn array<'g>(&self, _guard: &'g EpochGuard<'_>) -> &'g BucketArray {
        // SAFETY: the pointer is never null, and an array unpublished after `_guard` was
        // pinned is retired, not freed, until the guard is dropped.
        unsafe { &*self.buckets.load(Ordering::SeqCst) }
    }

    fn writer_array(&self, _writer: &parking_lot::MutexGuard<'_, ()>) -> &BucketArray {
        // SAFETY: the array is only replaced and retired with the writer lock held
        unsafe { &*self.buckets.load(Ordering::SeqCst) }
    }

    /// Look up `sel` without taking any lock.
    ///
    /// # Arguments
    ///
    /// * `sel` - The selector to look up
    /// * `guard` - A pin of the reclaimer this cache retires arrays to
    ///
    /// # Returns
    ///
    /// The cached implementation, or `None` on a miss. A miss may be stale; callers fall
    /// back to the slow lookup.
    ///
    /// # Panics
    ///
    /// Panics (aborts in release builds) if a probe visits every bucket without finding the
    /// selector or an empty bucket.
    #[must_use]
    pub fn find(&self, sel: Selector, guard: &EpochGuard<'_>) -> Option<Imp> {
        self.array(guard).find(sel)
    }

    /// Insert or overwrite `sel`; the caller holds the owning class's lock.
    ///
    /// Grows the cache (doubling) before the insert would exceed the policy's load factor.
    /// At the maximum capacity the cache is flushed instead of grown. Writers are also
    /// serialized by an internal lock, which is uncontended under the class lock.
    pub fn insert(
        &self,
        sel: Selector,
        imp: Imp,
        atomicity: Atomicity,
        policy: &CachePolicy,
        reclaimer: &Reclaimer,
    ) {
        let writer = self.writer.lock();
        let array = self.writer_array(&writer);
        let occupied = self.occupied.load(Ordering::Relaxed);
        let capacity = array.capacity();

        if occupied + 1 > policy.max_occupied(capacity) && array.find(sel).is_none() {
            if capacity >= policy.max_capacity {
                tracing::trace!(capacity, occupied, "method cache full, flushing");
                self.replace(&writer, BucketArray::new(capacity), 0, reclaimer);
            } else {
                self.grow(&writer, capacity.saturating_mul(2), reclaimer);
            }
        }

        if self.writer_array(&writer).insert(sel, imp, atomicity) {
            self.occupied.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn grow(
        &self,
        writer: &parking_lot::MutexGuard<'_, ()>,
        new_capacity: u32,
        reclaimer: &Reclaimer,
    ) {
        let old = self.writer_array(writer);
        let fresh = BucketArray::new(new_capacity);

        let mut occupied = 0;
        for (sel, imp) in old.entries() {
            if fresh.insert(sel, imp, Atomicity::NotAtomic) {
                occupied += 1;
            }
        }

        tracing::trace!(
            old_capacity = old.capacity(),
            new_capacity,
            occupied,
            "method cache grown"
        );
        self.replace(writer, fresh, occupied, reclaimer);
    }

    fn replace(
        &self,
        _writer: &parking_lot::MutexGuard<'_, ()>,
        fresh: Box<BucketArray>,
        occupied: u32,
        reclaimer: &Reclaimer,
    ) {
        self.occupied.store(occupied, Ordering::Relaxed);
        let old = self.buckets.swap(Box::into_raw(fresh), Ordering::SeqCst);

        // SAFETY: `old` came from `Box::into_raw` and is no longer reachable through the cache
        reclaimer.retire(unsafe { Box::from_raw(old) });
    }

    /// Empty the cache and shrink it to the policy's initial capacity.
    ///
    /// Always bumps the cache generation, even when the cache is already empty, so that a
    /// slow lookup racing with the invalidation does not insert a stale result.
    pub fn reset(&self, policy: &CachePolicy, reclaimer: &Reclaimer) {
        let writer = self.writer.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);

        let array = self.writer_array(&writer);
        if array.capacity() == policy.initial_capacity && self.occupied.load(Ordering::Relaxed) == 0 {
            return;
        }

        tracing::trace!(capacity = array.capacity(), "method cache reset");
        self.replace(&writer, BucketArray::new(policy.initial_capacity), 0, reclaimer);
    }

    /// Invalidation counter, bumped by every [`MethodCache::reset`]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of buckets of the current array
    #[must_use]
    pub fn capacity(&self, guard: &EpochGuard<'_>) -> u32 {
        self.array(guard).capacity()
    }

    /// Number of occupied buckets
    #[must_use]
    pub fn occupied(&self) -> u32 {
        self.occupied.load(Ordering::Relaxed)
    }

    /// Returns `true` if no selector is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// Snapshot of all cached pairs, in bucket order.
    #[must_use]
    pub fn entries(&self, guard: &EpochGuard<'_>) -> Vec<(Selector, Imp)> {
        self.array(guard).entries().collect()
    }
}

impl Drop for MethodCache {
    fn drop(&mut self) {
        let array = *self.buckets.get_mut();
        // SAFETY: exclusive access; the pointer came from `Box::into_raw`
        drop(unsafe { Box::from_raw(array) });
    }
}

impl fmt::Debug for MethodCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCache")
            .field("occupied", &self.occupied())
            .field("generation", &self.generation())
            .finish()
    }
}
