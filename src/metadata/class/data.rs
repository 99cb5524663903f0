//! The class data word: which record is authoritative, plus the fast flag bits.
//!
//! Before realization a class is described by its loader-provided [`ClassRo`]; afterwards by
//! its [`ClassRw`]. [`ClassData`] holds both slots and an atomic realization state. The
//! read-write record is published exactly once through a `OnceLock` (a release store paired
//! with acquire loads), so a thread that sees the record also sees it fully initialized.
//!
//! The fast flags are a separate atomic bit set for queries on the allocation and
//! retain/release fast paths that must not touch the read-write record.

use std::sync::{
    atomic::{AtomicU32, AtomicU8, Ordering},
    Arc, OnceLock,
};

use bitflags::bitflags;

use crate::metadata::class::{ClassRo, ClassRw};

bitflags! {
    /// Fast-path class flags kept beside the data word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FastFlags: u32 {
        /// The class is a bridged-language class using the legacy ABI
        const IS_BRIDGED_LEGACY = 1 << 0;
        /// The class is a bridged-language class using the stable ABI
        const IS_BRIDGED_STABLE = 1 << 1;
        /// The class and its superclasses use the default retain/release methods
        const HAS_DEFAULT_RR = 1 << 2;
        /// The class and its superclasses use the default allocation methods
        const HAS_DEFAULT_AWZ = 1 << 3;
        /// Instances require a raw isa
        const REQUIRES_RAW_ISA = 1 << 4;
        /// Instances need a constructor call
        const HAS_CXX_CTOR = 1 << 5;
        /// Instances need a destructor call
        const HAS_CXX_DTOR = 1 << 6;
    }
}

/// Realization progress of a class. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RealizationState {
    /// Only the read-only record exists
    Unrealized = 0,
    /// A thread is building the read-write record
    Realizing = 1,
    /// The read-write record is published
    Realized = 2,
}

impl RealizationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RealizationState::Unrealized,
            1 => RealizationState::Realizing,
            _ => RealizationState::Realized,
        }
    }
}

/// The authoritative record of a class, as seen through its data word.
#[derive(Debug, Clone, Copy)]
pub enum ClassDataRef<'a> {
    /// The class is not realized; only the loader's record exists
    ReadOnly(&'a Arc<ClassRo>),
    /// The class is realized
    ReadWrite(&'a ClassRw),
}

/// Per-class data word.
#[derive(Debug)]
pub struct ClassData {
    state: AtomicU8,
    ro: Arc<ClassRo>,
    rw: OnceLock<ClassRw>,
    fast: AtomicU32,
}

impl ClassData {
    /// Wrap a loader-provided read-only record.
    #[must_use]
    pub fn new(ro: Arc<ClassRo>) -> Self {
        ClassData {
            state: AtomicU8::new(RealizationState::Unrealized as u8),
            ro,
            rw: OnceLock::new(),
            fast: AtomicU32::new(0),
        }
    }

    /// The authoritative record
    #[must_use]
    pub fn get(&self) -> ClassDataRef<'_> {
        match self.rw.get() {
            Some(rw) => ClassDataRef::ReadWrite(rw),
            None => ClassDataRef::ReadOnly(&self.ro),
        }
    }

    /// The read-write record, once realized
    #[must_use]
    pub fn rw(&self) -> Option<&ClassRw> {
        self.rw.get()
    }

    /// The loader-provided read-only record, never a private copy
    #[must_use]
    pub fn loader_ro(&self) -> &Arc<ClassRo> {
        &self.ro
    }

    /// The current read-only record regardless of realization state.
    ///
    /// After promotion this is the class's private copy.
    #[must_use]
    pub fn safe_ro(&self) -> Arc<ClassRo> {
        match self.get() {
            ClassDataRef::ReadWrite(rw) => rw.lock().ro.clone(),
            ClassDataRef::ReadOnly(ro) => ro.clone(),
        }
    }

    /// Current realization state
    #[must_use]
    pub fn state(&self) -> RealizationState {
        RealizationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` once the read-write record is published
    #[must_use]
    pub fn is_realized(&self) -> bool {
        self.rw.get().is_some()
    }

    /// Claim the realization of this class.
    ///
    /// # Returns
    ///
    /// `true` for exactly one caller; every other caller (concurrent or later) gets `false`.
    pub fn begin_realizing(&self) -> bool {
        self.state
            .compare_exchange(
                RealizationState::Unrealized as u8,
                RealizationState::Realizing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publish the read-write record built by the thread that won [`ClassData::begin_realizing`].
    ///
    /// # Returns
    ///
    /// The published record.
    pub fn publish(&self, rw: ClassRw) -> &ClassRw {
        debug_contract!(
            self.state() == RealizationState::Realizing,
            "publishing class '{}' in state {:?}",
            self.ro.name,
            self.state()
        );

        let published = self.rw.get_or_init(|| rw);
        self.state
            .store(RealizationState::Realized as u8, Ordering::Release);
        published
    }

    /// Current fast flags
    #[must_use]
    pub fn fast_flags(&self) -> FastFlags {
        FastFlags::from_bits_retain(self.fast.load(Ordering::Acquire))
    }

    /// Atomically set `set` and clear `clear`.
    pub fn set_and_clear(&self, set: FastFlags, clear: FastFlags) {
        let mut current = self.fast.load(Ordering::Relaxed);
        loop {
            let next = (current | set.bits()) & !clear.bits();
            match self
                .fast
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically set `flags`.
    pub fn set_fast(&self, flags: FastFlags) {
        self.set_and_clear(flags, FastFlags::empty());
    }

    /// Atomically clear `flags`.
    pub fn clear_fast(&self, flags: FastFlags) {
        self.set_and_clear(FastFlags::empty(), flags);
    }

    /// Mark the class as a stable-ABI bridged class (clears the legacy marker).
    pub fn set_bridged_stable(&self) {
        self.set_and_clear(FastFlags::IS_BRIDGED_STABLE, FastFlags::IS_BRIDGED_LEGACY);
    }

    /// Mark the class as a legacy-ABI bridged class (clears the stable marker).
    pub fn set_bridged_legacy(&self) {
        self.set_and_clear(FastFlags::IS_BRIDGED_LEGACY, FastFlags::IS_BRIDGED_STABLE);
    }

    /// Returns `true` for a bridged-language class of either ABI
    #[must_use]
    pub fn is_bridged(&self) -> bool {
        self.fast_flags()
            .intersects(FastFlags::IS_BRIDGED_LEGACY | FastFlags::IS_BRIDGED_STABLE)
    }
}
