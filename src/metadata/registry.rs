//! The class registry: realization, categories and method resolution.
//!
//! [`ClassRegistry`] owns every registered [`Class`] in an append-only arena and coordinates
//! all operations that touch more than one class: realization (which links a class into
//! the realized-class tree), category attachment (which invalidates the caches of a whole
//! subtree), method resolution (which walks the superclass chain and fills the receiver's
//! cache) and the class-initialization barrier.
//!
//! # Locking
//!
//! Two levels of locks are used, always in this order:
//!
//! 1. The registry tree lock, held while tree links are changed or walked and while the
//!    queue of unattached categories is consulted.
//! 2. Class locks, held one at a time, except for [`ClassRegistry::exchange_implementations`]
//!    which takes two through [`Mutex::lock_two`].
//!
//! Method resolution takes no tree lock. It locks each class of the superclass chain in
//! turn and then the receiver to fill its cache, and skips the fill if the receiver's
//! cache was reset in the meantime.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use objcore::metadata::class::{Category, ClassRo};
//! use objcore::metadata::records::{MethodList, MethodRecord};
//! use objcore::{ClassRegistry, Imp, Selector, Symbol};
//!
//! let registry = ClassRegistry::default();
//! let sel = Selector::intern("describe");
//! let method = |imp| MethodRecord::new(sel, Symbol::intern("@16@0:8"), Imp::new(imp).unwrap());
//!
//! let base = registry.add_class(
//!     ClassRo::new("Base").with_methods(Arc::new(MethodList::new(&[method(0x100)]))),
//!     None,
//! )?;
//! let derived = registry.add_class(ClassRo::new("Derived"), Some(base))?;
//! registry.realize(base)?;
//! registry.realize(derived)?;
//!
//! // Inherited through the superclass chain, then served from the cache
//! assert_eq!(registry.lookup_imp(derived, sel)?, Imp::new(0x100).unwrap());
//! assert_eq!(registry.cache_lookup(derived, sel)?, Imp::new(0x100));
//!
//! // A category on the superclass shadows the original and invalidates the subclass cache
//! let category = Category::new("Verbose", base)
//!     .with_instance_methods(Arc::new(MethodList::new(&[method(0x200)])));
//! registry.add_category(category)?;
//! assert_eq!(registry.cache_lookup(derived, sel)?, None);
//! assert_eq!(registry.lookup_imp(derived, sel)?, Imp::new(0x200).unwrap());
//! # Ok::<(), objcore::Error>(())
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
};

use crossbeam_skiplist::SkipMap;
use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    config::RuntimeConfig,
    metadata::{
        cache::{Atomicity, Reclaimer},
        class::{Category, Class, ClassGuard, ClassId, ClassRo, ClassRw, FastFlags, RoFlags, RwFlags},
        records::IvarRecord,
        selector::{Imp, Selector},
        traversal::{self, ClassTree},
    },
    sync::{LockRegistry, Monitor, Mutex, MutexGuard},
    Error, Result,
};

/// Classes currently running their initializer, and the thread running it
type InitializingSet = HashMap<ClassId, ThreadId>;

/// Registry of all classes of a runtime.
pub struct ClassRegistry {
    config: RuntimeConfig,
    classes: boxcar::Vec<Arc<Class>>,
    names: DashMap<Arc<str>, ClassId>,
    unattached: SkipMap<(ClassId, u64), Arc<Category>>,
    category_seq: AtomicU64,
    tree: Mutex<()>,
    reclaimer: Reclaimer,
    initializing: Monitor<InitializingSet>,
}

impl ClassRegistry {
    /// Create an empty registry.
    ///
    /// Lock debugging is process-wide: a configuration with `lock_debug` set enables it for
    /// every lock, a configuration without it leaves the current setting alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails [`RuntimeConfig::validate`].
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        if config.lock_debug {
            LockRegistry::init(true);
        }

        Ok(ClassRegistry {
            config,
            classes: boxcar::Vec::new(),
            names: DashMap::new(),
            unattached: SkipMap::new(),
            category_seq: AtomicU64::new(0),
            tree: Mutex::new("class tree", ()),
            reclaimer: Reclaimer::new(config.reclaim_threshold),
            initializing: Monitor::new("class initialization", HashMap::new()),
        })
    }

    /// The configuration this registry was created with
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The reclaimer of retired cache memory
    #[must_use]
    pub fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }

    /// Number of registered classes, metaclasses included
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.count()
    }

    /// All registered classes in registration order
    pub fn classes(&self) -> impl Iterator<Item = &Arc<Class>> + '_ {
        self.classes.iter().map(|(_, class)| class)
    }

    /// Register a class described by a loader-provided record.
    ///
    /// # Arguments
    ///
    /// * `ro` - The read-only record
    /// * `superclass` - The superclass, `None` for a root class
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNameInUse`] if a class of the same name exists and
    /// [`Error::ClassNotFound`] for an unknown superclass.
    pub fn add_class(&self, ro: ClassRo, superclass: Option<ClassId>) -> Result<ClassId> {
        if let Some(superclass) = superclass {
            self.class(superclass)?;
        }

        let tree = self.tree.lock();
        match self.names.entry(ro.name.clone()) {
            Entry::Occupied(_) => Err(Error::ClassNameInUse(ro.name.to_string())),
            Entry::Vacant(slot) => {
                let id = self.push_class(&tree, Arc::new(ro), superclass)?;
                slot.insert(id);
                Ok(id)
            }
        }
    }

    /// Register the metaclass of an unrealized class.
    ///
    /// The metaclass holds the class methods. It is realized together with its class.
    ///
    /// # Arguments
    ///
    /// * `of` - The class the metaclass belongs to
    /// * `ro` - The metaclass record; [`RoFlags::META`] is added if missing
    /// * `superclass` - The superclass's metaclass, or the root class for a root metaclass
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] for an unknown class, [`Error::AlreadyRealized`] if
    /// `of` is realized, and [`Error::Malformed`] if `of` already has a metaclass or is
    /// itself a metaclass.
    pub fn add_metaclass(
        &self,
        of: ClassId,
        mut ro: ClassRo,
        superclass: Option<ClassId>,
    ) -> Result<ClassId> {
        let class = self.class(of)?;
        if class.is_meta() {
            return Err(malformed_error!("metaclass '{}' cannot have a metaclass", class.name()));
        }
        if let Some(superclass) = superclass {
            self.class(superclass)?;
        }

        ro.flags |= RoFlags::META;
        let tree = self.tree.lock();
        if class.is_realized() {
            return Err(Error::AlreadyRealized(class.name().to_string()));
        }
        if class.metaclass().is_some() {
            return Err(malformed_error!("class '{}' already has a metaclass", class.name()));
        }

        let meta = self.push_class(&tree, Arc::new(ro), superclass)?;
        class.set_metaclass(meta);
        Ok(meta)
    }

    /// Append a class to the arena. Pushes are serialized by the tree lock, so the next
    /// arena index is known before the push.
    fn push_class(
        &self,
        _tree: &MutexGuard<'_, ()>,
        ro: Arc<ClassRo>,
        superclass: Option<ClassId>,
    ) -> Result<ClassId> {
        let index = self.classes.count();
        if index >= self.config.max_class_count {
            return Err(Error::InvalidConfig(format!(
                "class limit of {} reached",
                self.config.max_class_count
            )));
        }

        let id = ClassId::from_index(index)
            .ok_or_else(|| Error::InvalidConfig("class id space exhausted".to_string()))?;
        let pushed = self
            .classes
            .push(Arc::new(Class::new(id, ro, superclass, &self.config.cache)));
        debug_contract!(
            pushed == index,
            "class arena index {} does not match id {}",
            pushed,
            id
        );
        Ok(id)
    }

    /// Look up a class by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] for an id this registry never handed out.
    pub fn class(&self, id: ClassId) -> Result<&Arc<Class>> {
        self.classes
            .get(id.index())
            .ok_or(Error::ClassNotFound(id))
    }

    /// Look up a (non-meta) class by name
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.names.get(name).map(|entry| *entry.value())
    }

    /// Realize a class: build its read-write record and make it authoritative.
    ///
    /// The read-write record starts with the base lists of the read-only record. If the
    /// superclass's instances grew past this class's instance start, the read-only record is
    /// promoted and the instance layout moved up. The class is linked into its superclass's
    /// subclass list, its metaclass is realized with it, and categories queued for it are
    /// attached in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] for an unknown class, [`Error::SuperclassNotRealized`]
    /// if the superclass is not realized, and [`Error::AlreadyRealized`] if the class was
    /// realized before or is being realized by another thread.
    pub fn realize(&self, id: ClassId) -> Result<()> {
        let class = self.class(id)?.clone();
        if class.is_meta() {
            return Err(malformed_error!(
                "metaclass '{}' is realized through its class",
                class.name()
            ));
        }

        let _tree = self.tree.lock();
        self.realize_locked(&class)?;

        if let Some(meta) = class.metaclass() {
            let meta = self.class(meta)?.clone();
            self.realize_locked(&meta)?;
        }

        let queued: Vec<Arc<Category>> = self
            .unattached
            .range((id, 0)..=(id, u64::MAX))
            .map(|entry| {
                let category = entry.value().clone();
                entry.remove();
                category
            })
            .collect();

        for category in &queued {
            self.attach_locked(&class, category)?;
        }

        tracing::debug!(
            class = class.name(),
            id = id.value(),
            categories = queued.len(),
            "class realized"
        );
        Ok(())
    }

    /// Realize one class; the tree lock is held.
    fn realize_locked(&self, class: &Class) -> Result<()> {
        let superclass = match class.superclass() {
            Some(superclass) => {
                let superclass = self.class(superclass)?;
                if !superclass.is_realized() {
                    return Err(Error::SuperclassNotRealized(class.name().to_string()));
                }
                Some(superclass)
            }
            None => None,
        };

        debug_contract!(
            !class.is_realized(),
            "class '{}' realized twice",
            class.name()
        );
        if !class.data().begin_realizing() {
            return Err(Error::AlreadyRealized(class.name().to_string()));
        }

        let ro = class.data().loader_ro().clone();
        let rw = ClassRw::new(ro.clone(), Self::initial_flags(&ro));
        rw.lock().methods.fix_up_lists();
        if let Some(superclass) = superclass {
            Self::reconcile_layout(&rw, &superclass.safe_ro(), class.name());
        }

        let rw = class.data().publish(rw);
        self.inherit_fast_flags(class, superclass.map(|s| &**s));

        if let Some(superclass) = superclass.and_then(|s| s.rw()) {
            rw.set_next_sibling(superclass.first_subclass());
            superclass.set_first_subclass(Some(class.id()));
        }

        rw.clear_flags(RwFlags::REALIZING);
        Ok(())
    }

    fn initial_flags(ro: &ClassRo) -> RwFlags {
        let mut flags = RwFlags::REALIZED | RwFlags::REALIZING;
        if ro.flags.contains(RoFlags::HAS_CXX_STRUCTORS) {
            flags |= RwFlags::HAS_CXX_DTOR;
            if !ro.flags.contains(RoFlags::HAS_CXX_DTOR_ONLY) {
                flags |= RwFlags::HAS_CXX_CTOR;
            }
        }
        if ro.flags.contains(RoFlags::FORBIDS_ASSOCIATED_OBJECTS) {
            flags |= RwFlags::FORBIDS_ASSOCIATED_OBJECTS;
        }
        if ro.flags.contains(RoFlags::FUTURE) {
            flags |= RwFlags::FUTURE;
        }
        flags
    }

    /// Move this class's instance variables past the end of the superclass's.
    ///
    /// The ivar offsets move with the layout. The shifted list is a fresh copy, the loader's
    /// list keeps its offsets.
    fn reconcile_layout(rw: &ClassRw, super_ro: &ClassRo, name: &str) {
        let mut guard = rw.lock();
        let start = guard.ro.instance_start;
        if super_ro.instance_size <= start {
            return;
        }

        let shift = super_ro.instance_size - start;
        let ro = rw.promote_ro(&mut guard);
        ro.instance_start += shift;
        ro.instance_size = ro.instance_size.saturating_add(shift);

        if let Some(ivars) = &ro.base_ivars {
            let shifted: Vec<IvarRecord> = ivars
                .iter()
                .map(|ivar| IvarRecord {
                    offset: ivar.offset.saturating_add(shift),
                    ..ivar
                })
                .collect();
            let mut moved = ivars.duplicate();
            for (index, ivar) in shifted.iter().enumerate() {
                // Same length as the source list
                if moved.set(index, ivar).is_err() {
                    unreachable!("ivar list shrank while shifting");
                }
            }
            ro.base_ivars = Some(Arc::new(moved));
        }

        tracing::debug!(
            class = name,
            shift,
            instance_size = ro.instance_size,
            "instance layout moved past superclass"
        );
    }

    fn inherit_fast_flags(&self, class: &Class, superclass: Option<&Class>) {
        let rw_flags = class.rw().map_or(RwFlags::empty(), ClassRw::flags);
        let mut fast = FastFlags::empty();
        if rw_flags.contains(RwFlags::HAS_CXX_CTOR) {
            fast |= FastFlags::HAS_CXX_CTOR;
        }
        if rw_flags.contains(RwFlags::HAS_CXX_DTOR) {
            fast |= FastFlags::HAS_CXX_DTOR;
        }

        match superclass {
            Some(superclass) => {
                let inherited = superclass.data().fast_flags()
                    & (FastFlags::HAS_DEFAULT_RR
                        | FastFlags::HAS_DEFAULT_AWZ
                        | FastFlags::REQUIRES_RAW_ISA
                        | FastFlags::HAS_CXX_CTOR
                        | FastFlags::HAS_CXX_DTOR);
                fast |= inherited;
            }
            None => fast |= FastFlags::HAS_DEFAULT_RR | FastFlags::HAS_DEFAULT_AWZ,
        }

        class.data().set_fast(fast);
    }

    /// Register a category.
    ///
    /// A category for a realized class is attached immediately; otherwise it is queued and
    /// attached when the class is realized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] if the category's class is unknown, or any error of
    /// [`ClassRegistry::attach_category`].
    pub fn add_category(&self, category: Category) -> Result<()> {
        let class = self.class(category.class())?.clone();
        let _tree = self.tree.lock();

        if class.is_realized() {
            return self.attach_locked(&class, &category);
        }

        let seq = self.category_seq.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            class = class.name(),
            category = category.name(),
            "category queued until realization"
        );
        self.unattached.insert((class.id(), seq), Arc::new(category));
        Ok(())
    }

    /// Number of categories waiting for their class to be realized
    #[must_use]
    pub fn unattached_count(&self) -> usize {
        self.unattached.len()
    }

    /// Attach a category to its realized class now.
    ///
    /// The category's lists are placed in front of every list the class already has, so its
    /// methods shadow earlier categories and the class's own methods. The caches of the class
    /// and of every realized subclass are reset. Class methods go to the metaclass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] for an unknown class, [`Error::NotRealized`] if the
    /// class is not realized, and [`Error::CorruptClassTree`] if the cache flush finds a
    /// damaged subclass tree.
    pub fn attach_category(&self, category: &Category) -> Result<()> {
        let class = self.class(category.class())?.clone();
        let _tree = self.tree.lock();
        self.attach_locked(&class, category)
    }

    /// Attach with the tree lock held.
    fn attach_locked(&self, class: &Class, category: &Category) -> Result<()> {
        let rw = class.require_rw()?;
        {
            let mut guard = rw.lock();
            if let Some(methods) = &category.instance_methods {
                guard.methods.attach_lists(vec![methods.clone()]);
                guard.methods.fix_up_lists();
            }
            if let Some(properties) = &category.properties {
                guard.properties.attach_lists(vec![properties.clone()]);
            }
            if let Some(protocols) = &category.protocols {
                guard.protocols.attach_lists(vec![protocols.clone()]);
            }
        }
        if !category.is_empty_for_class() {
            self.flush_subtree_locked(class.id())?;
        }

        if let Some(class_methods) = &category.class_methods {
            match class.metaclass() {
                Some(meta) => {
                    let meta = self.class(meta)?;
                    let meta_rw = meta.require_rw()?;
                    let mut guard = meta_rw.lock();
                    guard.methods.attach_lists(vec![class_methods.clone()]);
                    guard.methods.fix_up_lists();
                    drop(guard);
                    self.flush_subtree_locked(meta.id())?;
                }
                None => tracing::warn!(
                    class = class.name(),
                    category = category.name(),
                    "class methods dropped, class has no metaclass"
                ),
            }
        }

        tracing::debug!(
            class = class.name(),
            category = category.name(),
            "category attached"
        );
        Ok(())
    }

    /// Look up `sel` in the cache of `class` only, without any lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] for an unknown class.
    pub fn cache_lookup(&self, class: ClassId, sel: Selector) -> Result<Option<Imp>> {
        let class = self.class(class)?;
        let guard = self.reclaimer.pin();
        Ok(class.cache().find(sel, &guard))
    }

    /// Find the implementation of `sel` for instances of `class`.
    ///
    /// Tries the inline cache first and falls back to [`ClassRegistry::resolve`].
    ///
    /// # Errors
    ///
    /// See [`ClassRegistry::resolve`].
    pub fn lookup_imp(&self, class: ClassId, sel: Selector) -> Result<Imp> {
        if let Some(imp) = self.cache_lookup(class, sel)? {
            return Ok(imp);
        }
        self.resolve(class, sel)
    }

    /// Resolve `sel` through the method lists of `class` and its superclasses and fill the
    /// cache of `class` with the result.
    ///
    /// The cache is not filled if it was reset while the lists were searched, so a racing
    /// category attachment never leaves a stale implementation behind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] for an unknown class, [`Error::NotRealized`] for an
    /// unrealized class, [`Error::MethodNotFound`] if no class of the chain implements `sel`,
    /// and [`Error::CorruptClassTree`] for a cyclic superclass chain.
    pub fn resolve(&self, id: ClassId, sel: Selector) -> Result<Imp> {
        let class = self.class(id)?;
        let rw = class.require_rw()?;
        let generation = class.cache().generation();

        let mut found = None;
        for current in traversal::superclass_chain(self, id, self.config.max_class_count) {
            let current = self.class(current?)?;
            let method = current.require_rw()?.lock().methods.find(sel);
            if let Some(method) = method {
                found = Some(method.imp);
                break;
            }
        }

        let imp = found.ok_or_else(|| Error::MethodNotFound {
            class: class.name().to_string(),
            selector: sel,
        })?;

        let guard = rw.lock();
        if class.cache().generation() == generation {
            self.fill_cache(class, &guard, sel, imp);
        }
        Ok(imp)
    }

    /// Insert into the cache of `class`; `_guard` proves the class lock is held.
    fn fill_cache(&self, class: &Class, _guard: &ClassGuard<'_>, sel: Selector, imp: Imp) {
        class.cache().insert(
            sel,
            imp,
            Atomicity::Atomic,
            &self.config.cache,
            &self.reclaimer,
        );
    }

    /// Reset the cache of one class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] for an unknown class.
    pub fn flush_cache(&self, id: ClassId) -> Result<()> {
        let class = self.class(id)?;
        self.reset_cache(class);
        Ok(())
    }

    /// Reset the cache of `id` and of every realized subclass of it.
    ///
    /// # Returns
    ///
    /// The number of caches reset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] for an unknown class and
    /// [`Error::CorruptClassTree`] for a damaged subclass tree.
    pub fn flush_subtree(&self, id: ClassId) -> Result<usize> {
        self.class(id)?;
        let _tree = self.tree.lock();
        self.flush_subtree_locked(id)
    }

    fn flush_subtree_locked(&self, id: ClassId) -> Result<usize> {
        let mut classes = Vec::new();
        traversal::walk_subclasses(self, id, self.config.max_class_count, |class| {
            classes.push(class);
        })?;

        for class in &classes {
            self.reset_cache(self.class(*class)?);
        }
        Ok(classes.len())
    }

    /// Reset the cache of every realized class.
    ///
    /// # Returns
    ///
    /// The number of caches reset.
    pub fn flush_all_caches(&self) -> usize {
        let mut flushed = 0;
        for class in self.classes().filter(|class| class.is_realized()) {
            self.reset_cache(class);
            flushed += 1;
        }

        tracing::debug!(classes = flushed, "all method caches flushed");
        flushed
    }

    fn reset_cache(&self, class: &Class) {
        // Unrealized classes never fill their cache
        if let Some(rw) = class.rw() {
            let _guard = rw.lock();
            class.cache().reset(&self.config.cache, &self.reclaimer);
        }
    }

    /// Swap the implementations of two methods, possibly of two different classes.
    ///
    /// Both class locks are held through [`Mutex::lock_two`]. The lists holding the methods
    /// are privatized before the change, so loader-provided lists stay untouched. The
    /// caches of both classes and their subclasses are reset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`], [`Error::NotRealized`], or
    /// [`Error::MethodNotFound`] if a class does not itself define its selector.
    pub fn exchange_implementations(
        &self,
        a: ClassId,
        sel_a: Selector,
        b: ClassId,
        sel_b: Selector,
    ) -> Result<()> {
        let class_a: &Class = self.class(a)?;
        let class_b: &Class = self.class(b)?;
        let rw_a = class_a.require_rw()?;
        let rw_b = class_b.require_rw()?;

        let missing = |class: &Class, selector: Selector| Error::MethodNotFound {
            class: class.name().to_string(),
            selector,
        };

        {
            let mut pair = Mutex::lock_two(rw_a.mutex(), rw_b.mutex());
            let (first, second) = pair.both();

            let imp_a = first
                .methods
                .find(sel_a)
                .ok_or_else(|| missing(class_a, sel_a))?
                .imp;
            match second {
                Some(second) => {
                    let imp_b = second
                        .methods
                        .find(sel_b)
                        .ok_or_else(|| missing(class_b, sel_b))?
                        .imp;
                    first.methods.set_imp(sel_a, imp_b);
                    second.methods.set_imp(sel_b, imp_a);
                }
                None => {
                    let imp_b = first
                        .methods
                        .find(sel_b)
                        .ok_or_else(|| missing(class_b, sel_b))?
                        .imp;
                    first.methods.set_imp(sel_a, imp_b);
                    first.methods.set_imp(sel_b, imp_a);
                }
            }
        }

        let _tree = self.tree.lock();
        self.flush_subtree_locked(a)?;
        if a != b {
            self.flush_subtree_locked(b)?;
        }

        tracing::debug!(
            class_a = class_a.name(),
            sel_a = sel_a.name(),
            class_b = class_b.name(),
            sel_b = sel_b.name(),
            "implementations exchanged"
        );
        Ok(())
    }

    /// Create a realized copy of a realized class under a new name.
    ///
    /// The copy has the same superclass and metaclass. Its read-only record and List Arrays
    /// are deep copies, so later changes to either class do not affect the other.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`], [`Error::NotRealized`] for an unrealized original,
    /// and [`Error::ClassNameInUse`] if `name` is taken.
    pub fn duplicate_class(&self, original: ClassId, name: &str) -> Result<ClassId> {
        let source = self.class(original)?.clone();
        let source_rw = source.require_rw()?;

        let (ro, methods, properties, protocols) = {
            let guard = source_rw.lock();
            let mut ro = guard.ro.duplicate();
            ro.name = Arc::from(name);
            (
                ro,
                guard.methods.duplicate(),
                guard.properties.duplicate(),
                guard.protocols.duplicate(),
            )
        };

        let id = self.add_class(ro, source.superclass())?;
        let copy = self.class(id)?.clone();
        if let Some(meta) = source.metaclass() {
            copy.set_metaclass(meta);
        }

        let _tree = self.tree.lock();
        if !copy.data().begin_realizing() {
            return Err(Error::AlreadyRealized(name.to_string()));
        }

        let flags = (source_rw.flags() | RwFlags::COPIED_RO)
            - (RwFlags::INITIALIZING | RwFlags::INITIALIZED | RwFlags::REALIZING);
        let rw = ClassRw::new(copy.data().loader_ro().clone(), flags);
        {
            let mut guard = rw.lock();
            guard.methods = methods;
            guard.properties = properties;
            guard.protocols = protocols;
        }

        let rw = copy.data().publish(rw);
        copy.data().set_fast(source.data().fast_flags());
        if let Some(superclass) = copy.superclass().and_then(|s| self.class(s).ok()).and_then(|s| s.rw()) {
            rw.set_next_sibling(superclass.first_subclass());
            superclass.set_first_subclass(Some(id));
        }

        tracing::debug!(original = source.name(), copy = name, "class duplicated");
        Ok(id)
    }

    /// Run the initializer of a class exactly once.
    ///
    /// The first caller marks the class INITIALIZING, runs `initializer` outside any lock,
    /// then marks it INITIALIZED and wakes every thread waiting for it. Concurrent callers
    /// block until then. A call from the thread already running the initializer returns
    /// at once, as does any call after initialization finished.
    ///
    /// A panicking initializer still finishes initialization: the class is marked
    /// INITIALIZED, waiters are woken and the panic continues in the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] or [`Error::NotRealized`].
    pub fn initialize_class<F: FnOnce()>(&self, id: ClassId, initializer: F) -> Result<()> {
        let class = self.class(id)?;
        class.require_rw()?;
        let current = thread::current().id();

        {
            let mut initializing = self.initializing.enter();
            loop {
                if class.is_initialized() {
                    return Ok(());
                }
                match initializing.get(&id).copied() {
                    Some(owner) if owner == current => return Ok(()),
                    Some(_) => initializing.wait(),
                    None => break,
                }
            }

            class.mark_initializing()?;
            initializing.insert(id, current);
        }

        let finish = FinishInitialization {
            initializing: &self.initializing,
            class,
        };
        initializer();
        drop(finish);

        tracing::debug!(class = class.name(), "class initialized");
        Ok(())
    }

    /// Change the instance size of a realized class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] or [`Error::NotRealized`].
    pub fn set_instance_size(&self, id: ClassId, size: u32) -> Result<()> {
        self.class(id)?.set_instance_size(size)
    }

    /// Free retired cache memory no reader can still reference.
    ///
    /// # Returns
    ///
    /// The number of bucket arrays freed.
    pub fn collect_garbage(&self) -> usize {
        self.reclaimer.collect()
    }
}

/// Completes an initialization started by [`ClassRegistry::initialize_class`], also when
/// the initializer unwinds.
struct FinishInitialization<'a> {
    initializing: &'a Monitor<InitializingSet>,
    class: &'a Class,
}

impl Drop for FinishInitialization<'_> {
    fn drop(&mut self) {
        let mut initializing = self.initializing.enter();
        initializing.remove(&self.class.id());
        if let Some(rw) = self.class.rw() {
            rw.change_flags(RwFlags::INITIALIZED, RwFlags::INITIALIZING);
        }
        if thread::panicking() {
            tracing::warn!(class = self.class.name(), "class initializer panicked");
        }
        initializing.notify_all();
    }
}

impl ClassTree for ClassRegistry {
    fn first_subclass(&self, class: ClassId) -> Option<ClassId> {
        self.class(class).ok()?.rw()?.first_subclass()
    }

    fn next_sibling(&self, class: ClassId) -> Option<ClassId> {
        self.class(class).ok()?.rw()?.next_sibling()
    }

    fn superclass(&self, class: ClassId) -> Option<ClassId> {
        self.class(class).ok()?.superclass()
    }

    fn class_name(&self, class: ClassId) -> String {
        self.class(class)
            .map_or_else(|_| class.to_string(), |class| class.name().to_string())
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        ClassRegistry {
            config: RuntimeConfig::default(),
            classes: boxcar::Vec::new(),
            names: DashMap::new(),
            unattached: SkipMap::new(),
            category_seq: AtomicU64::new(0),
            tree: Mutex::new("class tree", ()),
            reclaimer: Reclaimer::new(RuntimeConfig::default().reclaim_threshold),
            initializing: Monitor::new("class initialization", HashMap::new()),
        }
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.class_count())
            .field("unattached", &self.unattached_count())
            .field("reclaimer", &self.reclaimer)
            .finish()
    }
}
