//! Classes and their metadata records.
//!
//! A class is described by two records. The read-only record ([`ClassRo`]) is produced by
//! the loader and never mutated in place. The read-write record ([`ClassRw`]) is created
//! once, at realization, and owns everything the runtime changes afterwards: the merged
//! method/property/protocol lists, the flag word and the links of the realized-class tree.
//! The class data word ([`ClassData`]) says which of the two is authoritative.
//!
//! # Key Components
//!
//! - [`ClassId`] - Arena index of a class in its [`crate::ClassRegistry`]
//! - [`Class`] - One registered class: records, data word and inline method cache
//! - [`ClassRo`] / [`RoFlags`] - Loader-provided record
//! - [`ClassRw`] / [`RwFlags`] - Runtime-owned record, with copy-on-write promotion of the
//!   read-only record through [`ClassRw::promote_ro`]
//! - [`ClassData`] / [`FastFlags`] - Realization state and fast-path flag bits
//! - [`Category`] - Metadata merged into an existing class
//!
//! # Thread Safety
//!
//! Every field of a [`Class`] is either immutable after registration, an atomic, or
//! guarded by the class lock held inside its [`ClassRw`].

mod category;
mod data;
mod ro;
mod rw;

pub use category::Category;
pub use data::{ClassData, ClassDataRef, FastFlags, RealizationState};
pub use ro::{ClassRo, RoFlags};
pub use rw::{ClassGuard, ClassRw, ClassRwInner, RwFlags};

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{config::CachePolicy, metadata::cache::MethodCache, Error, Result};

/// Smallest size of an allocated instance
const MIN_INSTANCE_SIZE: usize = 16;

/// Word size instance sizes are rounded up to
const WORD_MASK: u32 = (std::mem::size_of::<usize>() - 1) as u32;

/// Identifier of a class inside a [`crate::ClassRegistry`].
///
/// Ids are non-zero, which lets tree links store "no class" as `0`. They are handed out by
/// [`crate::ClassRegistry::add_class`] in registration order.
///
/// # Examples
///
/// ```rust
/// use objcore::ClassId;
///
/// let id = ClassId::new(3);
/// assert_eq!(id.value(), 3);
/// assert_eq!(id.index(), 2);
/// assert_eq!(ClassId::from_raw(0), None);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(u32);

impl ClassId {
    /// Creates a `ClassId` from its raw, non-zero value.
    #[must_use]
    #[inline]
    pub const fn new(value: u32) -> Self {
        debug_assert!(value != 0);
        ClassId(value)
    }

    /// Creates a `ClassId` from a stored link value; `0` means no class.
    #[must_use]
    #[inline]
    pub const fn from_raw(value: u32) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(ClassId(value))
        }
    }

    /// The raw value of this id
    #[must_use]
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// The 0-based arena index of this id
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    pub(crate) fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index + 1).ok().map(ClassId)
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// A registered class.
///
/// Created by [`crate::ClassRegistry::add_class`] or
/// [`crate::ClassRegistry::add_metaclass`], realized by [`crate::ClassRegistry::realize`].
pub struct Class {
    id: ClassId,
    name: Arc<str>,
    superclass: Option<ClassId>,
    metaclass: OnceLock<ClassId>,
    data: ClassData,
    cache: MethodCache,
}

impl Class {
    pub(crate) fn new(
        id: ClassId,
        ro: Arc<ClassRo>,
        superclass: Option<ClassId>,
        policy: &CachePolicy,
    ) -> Self {
        Class {
            id,
            name: ro.name.clone(),
            superclass,
            metaclass: OnceLock::new(),
            data: ClassData::new(ro),
            cache: MethodCache::new(policy),
        }
    }

    /// This class's id
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// The class name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The superclass, `None` for a root class
    #[must_use]
    pub fn superclass(&self) -> Option<ClassId> {
        self.superclass
    }

    /// The metaclass, if one was registered
    #[must_use]
    pub fn metaclass(&self) -> Option<ClassId> {
        self.metaclass.get().copied()
    }

    pub(crate) fn set_metaclass(&self, metaclass: ClassId) -> bool {
        self.metaclass.set(metaclass).is_ok()
    }

    /// Returns `true` if this is a metaclass
    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.data.loader_ro().is_meta()
    }

    /// The class data word
    #[must_use]
    pub fn data(&self) -> &ClassData {
        &self.data
    }

    /// The inline method cache
    #[must_use]
    pub fn cache(&self) -> &MethodCache {
        &self.cache
    }

    /// Returns `true` once the class is realized
    #[must_use]
    pub fn is_realized(&self) -> bool {
        self.data.is_realized()
    }

    /// The read-write record, once realized
    #[must_use]
    pub fn rw(&self) -> Option<&ClassRw> {
        self.data.rw()
    }

    /// The read-write record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRealized`] if the class is not realized yet.
    pub fn require_rw(&self) -> Result<&ClassRw> {
        self.data
            .rw()
            .ok_or_else(|| Error::NotRealized(self.name.to_string()))
    }

    /// The current read-only record, whether or not the class is realized.
    #[must_use]
    pub fn safe_ro(&self) -> Arc<ClassRo> {
        self.data.safe_ro()
    }

    /// Offset of the first instance variable of this class
    #[must_use]
    pub fn instance_start(&self) -> u32 {
        self.safe_ro().instance_start
    }

    /// Unaligned instance size
    #[must_use]
    pub fn instance_size(&self) -> u32 {
        self.safe_ro().instance_size
    }

    /// Instance size rounded up to the machine word.
    #[must_use]
    pub fn aligned_instance_size(&self) -> u32 {
        self.instance_size().saturating_add(WORD_MASK) & !WORD_MASK
    }

    /// Allocation size of an instance with `extra` trailing bytes.
    ///
    /// Never smaller than 16 bytes.
    #[must_use]
    pub fn instance_size_with_extra(&self, extra: usize) -> usize {
        (self.aligned_instance_size() as usize + extra).max(MIN_INSTANCE_SIZE)
    }

    /// Change the instance size of a realized class.
    ///
    /// Promotes the read-only record to a private copy first; the loader's record keeps its
    /// original size. Setting the current size again changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRealized`] if the class is not realized.
    pub fn set_instance_size(&self, size: u32) -> Result<()> {
        let rw = self.require_rw()?;
        let mut guard = rw.lock();
        if guard.ro.instance_size != size {
            rw.promote_ro(&mut guard).instance_size = size;
        }
        Ok(())
    }

    /// Mark the class as running its initializer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRealized`] for an unrealized class and
    /// [`Error::AlreadyInitialized`] if the class already finished initializing.
    pub fn mark_initializing(&self) -> Result<()> {
        let rw = self.require_rw()?;
        if rw.has(RwFlags::INITIALIZED) {
            return Err(Error::AlreadyInitialized(self.name.to_string()));
        }
        rw.set_flags(RwFlags::INITIALIZING);
        Ok(())
    }

    /// Mark the class as initialized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRealized`] for an unrealized class.
    pub fn mark_initialized(&self) -> Result<()> {
        self.require_rw()?
            .change_flags(RwFlags::INITIALIZED, RwFlags::INITIALIZING);
        Ok(())
    }

    /// Returns `true` once the class finished initializing
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.rw().is_some_and(|rw| rw.has(RwFlags::INITIALIZED))
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("superclass", &self.superclass)
            .field("metaclass", &self.metaclass())
            .field("state", &self.data.state())
            .field("cache", &self.cache)
            .finish()
    }
}
