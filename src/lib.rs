// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
// - 'metadata/cache' publishes bucket arrays through an AtomicPtr and frees them deferred
// - 'sync' force-unlocks parking_lot locks around fork and in RecursiveMutex::try_unlock

//! # objcore
//!
//! The object-model core of a dynamic, message-passing object runtime. `objcore` stores
//! per-class method, property and protocol metadata, lets categories extend that metadata
//! after a class was loaded, and answers "which implementation handles this selector for
//! this class?" through a per-class inline cache with lock-free reads.
//!
//! ## Features
//!
//! - **Lock-free dispatch lookups** - Open-addressed inline method caches, read without any
//!   lock while a writer grows them
//! - **Deferred reclamation** - Replaced cache memory is retired to an epoch-based
//!   reclaimer and freed only once no reader can still see it
//! - **Copy-on-write metadata** - Loader-provided records are never mutated; a class
//!   privatizes its read-only record before the first change
//! - **Category merging** - Later categories shadow earlier ones and the class's own methods
//!   without touching the loader's lists
//! - **Deadlock-free lock substrate** - Mutex, recursive mutex and monitor with
//!   address-ordered pairwise locking, ownership debugging and fork hooks
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use objcore::prelude::*;
//!
//! let registry = ClassRegistry::new(RuntimeConfig::default())?;
//! let greet = Selector::intern("greet");
//! let types = Symbol::intern("v16@0:8");
//!
//! let object = registry.add_class(ClassRo::new("Object"), None)?;
//! registry.realize(object)?;
//!
//! // Not implemented yet
//! assert!(registry.lookup_imp(object, greet).is_err());
//!
//! // A category adds it
//! let methods = MethodList::new(&[MethodRecord::new(greet, types, Imp::new(0x4000).unwrap())]);
//! registry.add_category(Category::new("Greeting", object).with_instance_methods(Arc::new(methods)))?;
//! assert_eq!(registry.lookup_imp(object, greet)?.value(), 0x4000);
//! # Ok::<(), objcore::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`metadata`] - Selectors, record lists, List Arrays, class records, method caches and
//!   the [`ClassRegistry`]
//! - [`sync`] - The lock substrate and the process-wide [`sync::LockRegistry`]
//! - [`config`] - [`RuntimeConfig`] and [`CachePolicy`]
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! Recoverable conditions, such as misuse of the class lifecycle or a damaged class tree,
//! are returned as [`Error`]. A corrupted method cache is not recoverable: it is logged
//! through `tracing` and terminates the process (release builds abort on panic).
//!
//! ## Logging
//!
//! The crate emits `tracing` events (realization, category attachment, cache growth and
//! reset, reclamation, fork hooks). It never installs a subscriber.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

pub(crate) mod utils;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use objcore::prelude::*;
///
/// let registry = ClassRegistry::default();
/// let id = registry.add_class(ClassRo::new("Prelude"), None)?;
/// assert_eq!(registry.lookup("Prelude"), Some(id));
/// # Ok::<(), objcore::Error>(())
/// ```
pub mod prelude;

/// Runtime configuration
///
/// Tunables of the cache growth policy, lock debugging, traversal budgets and reclamation.
pub mod config;

/// Class metadata, method caches and the class registry
///
/// # Key Components
///
/// - [`metadata::registry::ClassRegistry`] - Realization, categories, method resolution
/// - [`metadata::cache::MethodCache`] - Per-class inline method cache
/// - [`metadata::list_array::ListArray`] - Merge structure for base and category lists
/// - [`metadata::records::RecordList`] - Packed method, property, protocol and ivar lists
/// - [`metadata::class`] - Read-only and read-write class records
pub mod metadata;

/// Lock substrate
///
/// Mutex, recursive mutex and monitor, all tracked by the process-wide
/// [`sync::LockRegistry`] for ownership assertions and fork handling.
pub mod sync;

/// `objcore` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
///
/// # Examples
///
/// ```rust
/// use objcore::{ClassId, ClassRegistry, Result};
///
/// fn realize_all(registry: &ClassRegistry, ids: &[ClassId]) -> Result<()> {
///     for id in ids {
///         registry.realize(*id)?;
///     }
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `objcore` Error type
///
/// The error type of every fallible operation in this crate.
///
/// # Examples
///
/// ```rust
/// use objcore::{ClassRegistry, Error};
/// use objcore::metadata::class::ClassRo;
///
/// let registry = ClassRegistry::default();
/// registry.add_class(ClassRo::new("Twice"), None)?;
///
/// match registry.add_class(ClassRo::new("Twice"), None) {
///     Err(Error::ClassNameInUse(name)) => assert_eq!(name, "Twice"),
///     other => panic!("unexpected {:?}", other),
/// }
/// # Ok::<(), objcore::Error>(())
/// ```
pub use error::Error;

/// Runtime configuration and cache policy
pub use config::{CachePolicy, RuntimeConfig};

/// The class registry, the main entry point
pub use metadata::registry::ClassRegistry;

/// Class identifiers
pub use metadata::class::ClassId;

/// Selectors, symbols and implementation handles
pub use metadata::selector::{Imp, Selector, Symbol};
