//! Epoch-based deferred reclamation of retired cache bucket arrays.
//!
//! Lock-free cache readers may still be probing a bucket array after a writer replaced it.
//! Replaced arrays are therefore retired here instead of being freed, and freed only once no
//! reader that could have seen them is still active.
//!
//! # Protocol
//!
//! - A reader [`Reclaimer::pin`]s before loading a bucket array pointer. Pinning publishes
//!   the current global epoch in a reader slot.
//! - A writer first unpublishes an array (swaps in its replacement), then retires it. The
//!   retired item is tagged with the global epoch, which is advanced at the same time.
//! - [`Reclaimer::collect`] reads the global epoch, then scans the reader slots, and frees
//!   every item whose tag is strictly older than both the epoch it read and the oldest epoch
//!   published by an active reader.
//!
//! A reader that loaded the old pointer pinned before the swap, so its epoch is at most the
//! tag of the retired array and the array survives until the reader unpins. All operations
//! of the protocol are sequentially consistent.

use std::{
    any::Any,
    cell::Cell,
    fmt,
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use crate::sync::Mutex;

/// Epoch value of a slot whose reader is not inside a critical section
const INACTIVE: u64 = 0;

thread_local! {
    /// Slot index this thread used last
    static SLOT_HINT: Cell<usize> = const { Cell::new(usize::MAX) };
}

struct ReaderSlot {
    epoch: AtomicU64,
    owned: AtomicBool,
}

impl ReaderSlot {
    fn claim(&self) -> bool {
        self.owned
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

struct Retired {
    epoch: u64,
    _item: Box<dyn Any + Send>,
}

/// Deferred reclamation queue shared by all method caches of a registry.
pub struct Reclaimer {
    epoch: AtomicU64,
    slots: boxcar::Vec<ReaderSlot>,
    retired: Mutex<Vec<Retired>>,
    threshold: usize,
    freed: AtomicU64,
}

impl Reclaimer {
    /// Create a reclaimer that collects automatically once more than `threshold` items wait.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Reclaimer {
            epoch: AtomicU64::new(1),
            slots: boxcar::Vec::new(),
            retired: Mutex::new("reclaimer", Vec::new()),
            threshold,
            freed: AtomicU64::new(0),
        }
    }

    /// Enter a read-side critical section.
    ///
    /// Everything loaded from a retirable pointer while the guard lives stays allocated.
    pub fn pin(&self) -> EpochGuard<'_> {
        let slot = self.claim_slot();
        let epoch = self.epoch.load(Ordering::SeqCst);
        if let Some(reader) = self.slots.get(slot) {
            reader.epoch.store(epoch, Ordering::SeqCst);
        }

        EpochGuard {
            reclaimer: self,
            slot,
            _not_send: PhantomData,
        }
    }

    fn claim_slot(&self) -> usize {
        let hint = SLOT_HINT.with(Cell::get);
        if let Some(slot) = self.slots.get(hint) {
            if slot.claim() {
                return hint;
            }
        }

        let index = self
            .slots
            .iter()
            .find_map(|(index, slot)| slot.claim().then_some(index))
            .unwrap_or_else(|| {
                self.slots.push(ReaderSlot {
                    epoch: AtomicU64::new(INACTIVE),
                    owned: AtomicBool::new(true),
                })
            });

        SLOT_HINT.with(|cell| cell.set(index));
        index
    }

    fn release_slot(&self, slot: usize) {
        if let Some(reader) = self.slots.get(slot) {
            reader.epoch.store(INACTIVE, Ordering::SeqCst);
            reader.owned.store(false, Ordering::Release);
        }
    }

    /// Hand over an unpublished item for deferred freeing.
    ///
    /// The caller must have removed every shared reference to `item` before retiring it.
    pub fn retire<T: Send + 'static>(&self, item: Box<T>) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst);

        let pending = {
            let mut retired = self.retired.lock();
            retired.push(Retired {
                epoch,
                _item: item,
            });
            retired.len()
        };

        if pending > self.threshold {
            self.collect();
        }
    }

    /// Free every retired item no active reader can still reference.
    ///
    /// # Returns
    ///
    /// The number of items freed.
    pub fn collect(&self) -> usize {
        let limit = self.safe_limit();
        self.free_below(limit)
    }

    /// Epoch below which every retired item is unreachable.
    ///
    /// The global epoch is read before the reader slots are scanned. Items retired after
    /// that read carry a tag at or above it, so a reader pinning during the scan can never
    /// lose an item it may still be probing.
    fn safe_limit(&self) -> u64 {
        let scan_epoch = self.epoch.load(Ordering::SeqCst);
        self.slots
            .iter()
            .map(|(_, slot)| slot.epoch.load(Ordering::SeqCst))
            .filter(|epoch| *epoch != INACTIVE)
            .fold(scan_epoch, u64::min)
    }

    fn free_below(&self, limit: u64) -> usize {
        let freed: Vec<Retired> = {
            let mut retired = self.retired.lock();
            let (free, keep): (Vec<Retired>, Vec<Retired>) =
                retired.drain(..).partition(|item| item.epoch < limit);
            *retired = keep;
            free
        };

        let count = freed.len();
        drop(freed);

        if count > 0 {
            self.freed.fetch_add(count as u64, Ordering::Relaxed);
            tracing::debug!(freed = count, pending = self.pending(), "reclaimed retired cache memory");
        }
        count
    }

    /// Number of retired items waiting to be freed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.retired.lock().len()
    }

    /// Total number of items freed so far
    #[must_use]
    pub fn freed(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }

    /// Number of readers currently pinned
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.epoch.load(Ordering::SeqCst) != INACTIVE)
            .count()
    }

    /// The current global epoch
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

impl Default for Reclaimer {
    fn default() -> Self {
        Reclaimer::new(32)
    }
}

impl fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reclaimer")
            .field("epoch", &self.epoch())
            .field("pending", &self.pending())
            .field("freed", &self.freed())
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// A pinned read-side critical section; unpins on drop.
///
/// Guards are tied to the pinning thread.
pub struct EpochGuard<'a> {
    reclaimer: &'a Reclaimer,
    slot: usize,
    _not_send: PhantomData<*const ()>,
}

impl EpochGuard<'_> {
    /// The reclaimer this guard pins
    #[must_use]
    pub fn reclaimer(&self) -> &Reclaimer {
        self.reclaimer
    }
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        self.reclaimer.release_slot(self.slot);
    }
}
