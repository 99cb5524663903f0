//! Categories: externally supplied metadata merged into an existing class.

use std::sync::Arc;

use crate::metadata::{
    class::ClassId,
    records::{MethodList, PropertyList, ProtocolList},
};

/// A bundle of methods, properties and protocols for an existing class.
///
/// Instance methods, properties and protocols are attached to the target class; class
/// methods are attached to its metaclass. Categories attached later shadow earlier ones and
/// the class's own definitions.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use objcore::metadata::class::{Category, ClassId};
/// use objcore::metadata::records::{MethodList, MethodRecord};
/// use objcore::{Imp, Selector, Symbol};
///
/// let methods = MethodList::new(&[MethodRecord::new(
///     Selector::intern("shine"),
///     Symbol::intern("v16@0:8"),
///     Imp::new(0x4000).unwrap(),
/// )]);
///
/// let category = Category::new("Polish", ClassId::new(1)).with_instance_methods(Arc::new(methods));
/// assert_eq!(category.name(), "Polish");
/// assert!(category.class_methods.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Category {
    name: Arc<str>,
    class: ClassId,
    /// Methods for instances of the class
    pub instance_methods: Option<Arc<MethodList>>,
    /// Methods for the class itself (attached to the metaclass)
    pub class_methods: Option<Arc<MethodList>>,
    /// Added properties
    pub properties: Option<Arc<PropertyList>>,
    /// Added protocol conformances
    pub protocols: Option<Arc<ProtocolList>>,
}

impl Category {
    /// Create an empty category named `name` for `class`.
    #[must_use]
    pub fn new(name: &str, class: ClassId) -> Self {
        Category {
            name: Arc::from(name),
            class,
            instance_methods: None,
            class_methods: None,
            properties: None,
            protocols: None,
        }
    }

    /// Set the instance method list
    #[must_use]
    pub fn with_instance_methods(mut self, methods: Arc<MethodList>) -> Self {
        self.instance_methods = Some(methods);
        self
    }

    /// Set the class method list
    #[must_use]
    pub fn with_class_methods(mut self, methods: Arc<MethodList>) -> Self {
        self.class_methods = Some(methods);
        self
    }

    /// Set the property list
    #[must_use]
    pub fn with_properties(mut self, properties: Arc<PropertyList>) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Set the protocol list
    #[must_use]
    pub fn with_protocols(mut self, protocols: Arc<ProtocolList>) -> Self {
        self.protocols = Some(protocols);
        self
    }

    /// The category name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The class this category extends
    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Returns `true` if the category contributes nothing to the class itself
    #[must_use]
    pub fn is_empty_for_class(&self) -> bool {
        self.instance_methods.is_none() && self.properties.is_none() && self.protocols.is_none()
    }
}
