//! Class metadata of the object model.
//!
//! This module holds everything the runtime knows about classes: interned selectors, the
//! packed method/property/protocol record lists, the List Arrays merging those lists, the
//! read-only and read-write class records, the per-class inline method cache and the
//! registry tying them together.
//!
//! # Key Components
//!
//! - [`selector`] - Interned [`Selector`](selector::Selector) and [`Symbol`](selector::Symbol)
//!   values and opaque [`Imp`](selector::Imp) handles
//! - [`records`] - Variable-length record lists
//! - [`list_array`] - The merge structure for base and category lists
//! - [`class`] - Read-only / read-write records, the class data word and categories
//! - [`cache`] - The inline method cache and deferred reclamation of its memory
//! - [`traversal`] - Bounded walks over the realized-class tree
//! - [`registry`] - [`ClassRegistry`](registry::ClassRegistry), the entry point
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use objcore::metadata::class::ClassRo;
//! use objcore::metadata::records::{MethodList, MethodRecord};
//! use objcore::metadata::registry::ClassRegistry;
//! use objcore::{Imp, Selector, Symbol};
//!
//! let registry = ClassRegistry::default();
//! let sel = Selector::intern("length");
//! let methods = MethodList::new(&[MethodRecord::new(
//!     sel,
//!     Symbol::intern("Q16@0:8"),
//!     Imp::new(0x1000).unwrap(),
//! )]);
//!
//! let string = registry.add_class(ClassRo::new("String").with_methods(Arc::new(methods)), None)?;
//! registry.realize(string)?;
//! assert_eq!(registry.lookup_imp(string, sel)?.value(), 0x1000);
//! # Ok::<(), objcore::Error>(())
//! ```

/// Inline method cache and deferred reclamation
pub mod cache;
/// Class records, class data word and categories
pub mod class;
/// List Array merge structure
pub mod list_array;
/// Variable-length record lists
pub mod records;
/// Class registry: realization, categories, resolution
pub mod registry;
/// Selectors, symbols and implementation handles
pub mod selector;
/// Bounded class-tree traversal
pub mod traversal;
