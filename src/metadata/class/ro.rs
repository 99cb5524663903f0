//! The read-only class record produced by the loader.

use std::sync::Arc;

use bitflags::bitflags;

use crate::metadata::records::{IvarList, MethodList, PropertyList, ProtocolList};

bitflags! {
    /// Flags of a read-only class record, as emitted by the compiler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RoFlags: u32 {
        /// The class is a metaclass
        const META = 1 << 0;
        /// The class is a root class
        const ROOT = 1 << 1;
        /// The class has constructors and/or destructors for its ivars
        const HAS_CXX_STRUCTORS = 1 << 2;
        /// The class has hidden visibility
        const HIDDEN = 1 << 4;
        /// The class is an exception class
        const EXCEPTION = 1 << 5;
        /// The class carries a bridged-language metadata initializer
        const HAS_BRIDGED_INITIALIZER = 1 << 6;
        /// The class was compiled with automatic reference counting
        const IS_ARC = 1 << 7;
        /// The class has a destructor but no constructor
        const HAS_CXX_DTOR_ONLY = 1 << 8;
        /// The class has weak ivars although it is not ARC
        const HAS_WEAK_WITHOUT_ARC = 1 << 9;
        /// Instances may not carry associated objects
        const FORBIDS_ASSOCIATED_OBJECTS = 1 << 10;
        /// The class lives in an unloadable bundle
        const FROM_BUNDLE = 1 << 29;
        /// The class is an unresolved future class
        const FUTURE = 1 << 30;
        /// The class is realized
        const REALIZED = 1 << 31;
    }
}

/// Compile-time class description.
///
/// A loader-provided record is never mutated. When the runtime must change a layout field,
/// the owning class first takes a private copy (see [`crate::metadata::class::RwFlags::COPIED_RO`]).
#[derive(Debug, Clone)]
pub struct ClassRo {
    /// Record flags
    pub flags: RoFlags,
    /// Offset of the first ivar of this class
    pub instance_start: u32,
    /// Instance size including all superclass ivars
    pub instance_size: u32,
    /// Class name
    pub name: Arc<str>,
    /// Methods defined by the class itself
    pub base_methods: Option<Arc<MethodList>>,
    /// Properties defined by the class itself
    pub base_properties: Option<Arc<PropertyList>>,
    /// Protocols adopted by the class itself
    pub base_protocols: Option<Arc<ProtocolList>>,
    /// Ivars declared by the class itself, offsets relative to the instance start
    pub base_ivars: Option<Arc<IvarList>>,
}

impl ClassRo {
    /// Create an empty record named `name`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use objcore::metadata::class::{ClassRo, RoFlags};
    ///
    /// let ro = ClassRo::new("Widget").with_layout(8, 24).with_flags(RoFlags::IS_ARC);
    /// assert_eq!(&*ro.name, "Widget");
    /// assert_eq!(ro.instance_size, 24);
    /// ```
    #[must_use]
    pub fn new(name: &str) -> Self {
        ClassRo {
            flags: RoFlags::empty(),
            instance_start: 0,
            instance_size: 0,
            name: Arc::from(name),
            base_methods: None,
            base_properties: None,
            base_protocols: None,
            base_ivars: None,
        }
    }

    /// Set the record flags
    #[must_use]
    pub fn with_flags(mut self, flags: RoFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the instance layout
    #[must_use]
    pub fn with_layout(mut self, instance_start: u32, instance_size: u32) -> Self {
        self.instance_start = instance_start;
        self.instance_size = instance_size;
        self
    }

    /// Set the base method list
    #[must_use]
    pub fn with_methods(mut self, methods: Arc<MethodList>) -> Self {
        self.base_methods = Some(methods);
        self
    }

    /// Set the base property list
    #[must_use]
    pub fn with_properties(mut self, properties: Arc<PropertyList>) -> Self {
        self.base_properties = Some(properties);
        self
    }

    /// Set the base protocol list
    #[must_use]
    pub fn with_protocols(mut self, protocols: Arc<ProtocolList>) -> Self {
        self.base_protocols = Some(protocols);
        self
    }

    /// Set the ivar list
    #[must_use]
    pub fn with_ivars(mut self, ivars: Arc<IvarList>) -> Self {
        self.base_ivars = Some(ivars);
        self
    }

    /// Returns `true` for a metaclass record
    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.flags.contains(RoFlags::META)
    }

    /// Independent deep copy, base lists included.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        ClassRo {
            flags: self.flags,
            instance_start: self.instance_start,
            instance_size: self.instance_size,
            name: self.name.clone(),
            base_methods: self.base_methods.as_ref().map(|l| Arc::new(l.duplicate())),
            base_properties: self.base_properties.as_ref().map(|l| Arc::new(l.duplicate())),
            base_protocols: self.base_protocols.as_ref().map(|l| Arc::new(l.duplicate())),
            base_ivars: self.base_ivars.as_ref().map(|l| Arc::new(l.duplicate())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        records::{IvarRecord, MethodRecord},
        selector::{Imp, Selector, Symbol},
    };

    #[test]
    fn duplicate_is_deep() {
        let sel = Selector::intern("ro:dup");
        let methods = Arc::new(MethodList::new(&[MethodRecord::new(
            sel,
            Symbol::intern("v16@0:8"),
            Imp::new(1).unwrap(),
        )]));
        let ivars = Arc::new(IvarList::new(&[IvarRecord::new(
            8,
            Symbol::intern("_value"),
            Symbol::intern("q"),
            8,
            8,
        )]));
        let ro = ClassRo::new("Original")
            .with_methods(methods.clone())
            .with_ivars(ivars.clone())
            .with_layout(8, 16);

        let mut copy = ro.duplicate();
        copy.instance_size = 32;
        assert!(!Arc::ptr_eq(copy.base_methods.as_ref().unwrap(), &methods));

        assert_eq!(ro.instance_size, 16);
        assert!(Arc::ptr_eq(ro.base_methods.as_ref().unwrap(), &methods));
        assert!(!Arc::ptr_eq(copy.base_ivars.as_ref().unwrap(), &ivars));
        assert_eq!(copy.base_ivars.as_ref().unwrap().get(0), ivars.get(0));
        assert_eq!(copy.base_methods.unwrap().get(0).unwrap().name, sel);
    }

    #[test]
    fn flags() {
        let ro = ClassRo::new("Meta").with_flags(RoFlags::META | RoFlags::ROOT);
        assert!(ro.is_meta());
        assert_eq!(RoFlags::REALIZED.bits(), 0x8000_0000);
        assert_eq!(RoFlags::HAS_BRIDGED_INITIALIZER.bits(), 0x40);
    }
}
