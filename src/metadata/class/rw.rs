//! The read-write class record created at realization.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use bitflags::bitflags;

use crate::{
    metadata::{
        class::{ClassId, ClassRo},
        list_array::ListArray,
        records::{MethodRecord, PropertyRecord, ProtocolRecord},
    },
    sync::{Mutex, MutexGuard},
};

bitflags! {
    /// Runtime-owned class state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RwFlags: u32 {
        /// The class is realized
        const REALIZED = 1 << 31;
        /// The class is an unresolved future class
        const FUTURE = 1 << 30;
        /// The class finished its initializer
        const INITIALIZED = 1 << 29;
        /// The class is running its initializer
        const INITIALIZING = 1 << 28;
        /// The read-only record is a private copy owned by this class
        const COPIED_RO = 1 << 27;
        /// The class is allocated but not yet registered
        const CONSTRUCTING = 1 << 26;
        /// The class is allocated and registered
        const CONSTRUCTED = 1 << 25;
        /// The class load hook already ran
        const LOADED = 1 << 23;
        /// Some instance carries associated objects
        const INSTANCES_HAVE_ASSOCIATED_OBJECTS = 1 << 22;
        /// Instances of the class have a specific ivar layout
        const HAS_INSTANCE_SPECIFIC_LAYOUT = 1 << 21;
        /// Instances may not carry associated objects
        const FORBIDS_ASSOCIATED_OBJECTS = 1 << 20;
        /// The class is being realized
        const REALIZING = 1 << 19;
        /// Instances need a constructor call
        const HAS_CXX_CTOR = 1 << 18;
        /// Instances need a destructor call
        const HAS_CXX_DTOR = 1 << 17;
        /// The class and its superclasses use the default allocation methods
        const HAS_DEFAULT_AWZ = 1 << 16;
        /// Instances require a raw isa
        const REQUIRES_RAW_ISA = 1 << 15;
        /// The class and its superclasses use the default retain/release methods
        const HAS_DEFAULT_RR = 1 << 14;
    }
}

/// Mutable metadata of a realized class, guarded by the class lock.
#[derive(Debug)]
pub struct ClassRwInner {
    /// The authoritative read-only record (shared with the loader until promoted)
    pub ro: Arc<ClassRo>,
    /// Merged method lists
    pub methods: ListArray<MethodRecord>,
    /// Merged property lists
    pub properties: ListArray<PropertyRecord>,
    /// Merged protocol lists
    pub protocols: ListArray<ProtocolRecord>,
}

/// Guard over a class's mutable metadata; holding it means holding the class lock.
pub type ClassGuard<'a> = MutexGuard<'a, ClassRwInner>;

/// Runtime-owned record of a realized class.
///
/// The flag word, version and tree links are atomics readable without the class lock.
/// The lists and the read-only pointer live behind the class lock ([`ClassRw::lock`]).
#[derive(Debug)]
pub struct ClassRw {
    flags: AtomicU32,
    version: AtomicU32,
    first_subclass: AtomicU32,
    next_sibling: AtomicU32,
    inner: Mutex<ClassRwInner>,
}

impl ClassRw {
    /// Build the record for `ro`, seeding each List Array with the matching base list.
    #[must_use]
    pub fn new(ro: Arc<ClassRo>, flags: RwFlags) -> Self {
        let inner = ClassRwInner {
            methods: ListArray::from_base(ro.base_methods.clone()),
            properties: ListArray::from_base(ro.base_properties.clone()),
            protocols: ListArray::from_base(ro.base_protocols.clone()),
            ro,
        };

        ClassRw {
            flags: AtomicU32::new(flags.bits()),
            version: AtomicU32::new(0),
            first_subclass: AtomicU32::new(0),
            next_sibling: AtomicU32::new(0),
            inner: Mutex::new("class", inner),
        }
    }

    /// Acquire the class lock.
    pub fn lock(&self) -> ClassGuard<'_> {
        self.inner.lock()
    }

    /// The class lock itself, for [`Mutex::lock_two`]
    #[must_use]
    pub fn mutex(&self) -> &Mutex<ClassRwInner> {
        &self.inner
    }

    /// Current flags
    #[must_use]
    pub fn flags(&self) -> RwFlags {
        RwFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    /// Returns `true` if all of `flags` are set
    #[must_use]
    pub fn has(&self, flags: RwFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Atomically set `flags`.
    pub fn set_flags(&self, flags: RwFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Atomically clear `flags`.
    pub fn clear_flags(&self, flags: RwFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Atomically set `set` and clear `clear` in one step.
    ///
    /// `set` and `clear` must not overlap.
    pub fn change_flags(&self, set: RwFlags, clear: RwFlags) {
        debug_assert!(
            (set & clear).is_empty(),
            "flags {:?} both set and cleared",
            set & clear
        );

        let mut current = self.flags.load(Ordering::Relaxed);
        loop {
            let next = (current | set.bits()) & !clear.bits();
            match self
                .flags
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically move from `from` to `to` only if all of `from` is set and none of `to`.
    ///
    /// # Returns
    ///
    /// `true` if this call performed the transition.
    pub fn transition(&self, from: RwFlags, to: RwFlags) -> bool {
        let mut current = self.flags.load(Ordering::Relaxed);
        loop {
            let flags = RwFlags::from_bits_retain(current);
            if !flags.contains(from) || flags.intersects(to) {
                return false;
            }

            let next = (current & !from.bits()) | to.bits();
            match self
                .flags
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// The class version number
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Relaxed)
    }

    /// Set the class version number
    pub fn set_version(&self, version: u32) {
        self.version.store(version, Ordering::Relaxed);
    }

    /// First realized subclass
    #[must_use]
    pub fn first_subclass(&self) -> Option<ClassId> {
        ClassId::from_raw(self.first_subclass.load(Ordering::Acquire))
    }

    /// Next realized sibling (another subclass of the same superclass)
    #[must_use]
    pub fn next_sibling(&self) -> Option<ClassId> {
        ClassId::from_raw(self.next_sibling.load(Ordering::Acquire))
    }

    /// Only called by the registry with its tree lock held.
    pub(crate) fn set_first_subclass(&self, class: Option<ClassId>) {
        self.first_subclass
            .store(class.map_or(0, |id| id.value()), Ordering::Release);
    }

    /// Only called by the registry with its tree lock held.
    pub(crate) fn set_next_sibling(&self, class: Option<ClassId>) {
        self.next_sibling
            .store(class.map_or(0, |id| id.value()), Ordering::Release);
    }

    /// Privatize the read-only record before a field of it is changed.
    ///
    /// The first call replaces the shared record with a deep copy and sets
    /// [`RwFlags::COPIED_RO`]; later calls return the private copy.
    ///
    /// # Arguments
    ///
    /// * `guard` - The held class lock of this record
    ///
    /// # Returns
    ///
    /// The private, mutable read-only record.
    pub fn promote_ro<'g>(&self, guard: &'g mut ClassGuard<'_>) -> &'g mut ClassRo {
        debug_assert_eq!(guard.lock_id(), self.inner.id(), "guard of another class");

        if !self.has(RwFlags::COPIED_RO) {
            guard.ro = Arc::new(guard.ro.duplicate());
            self.set_flags(RwFlags::COPIED_RO);
        }

        // Snapshots handed out earlier keep their own version
        Arc::make_mut(&mut guard.ro)
    }
}
