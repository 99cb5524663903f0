//! # objcore Prelude
//!
//! This module provides a convenient prelude for the most commonly used types of the
//! objcore library. Import this module to get quick access to the essential types for
//! registering classes, attaching categories and resolving methods.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all objcore operations
pub use crate::Error;

/// The result type used throughout objcore
pub use crate::Result;

/// Runtime configuration and cache growth policy
pub use crate::{CachePolicy, RuntimeConfig};

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Registry of all classes, realization and method resolution
pub use crate::ClassRegistry;

/// Identifiers and handles
pub use crate::{ClassId, Imp, Selector, Symbol};

// ================================================================================================
// Class Metadata
// ================================================================================================

/// Class records and categories
pub use crate::metadata::class::{
    Category, Class, ClassData, ClassRo, ClassRw, FastFlags, RealizationState, RoFlags, RwFlags,
};

/// Record lists and their element kinds
pub use crate::metadata::records::{
    IvarList, IvarRecord, MethodList, MethodRecord, PropertyList, PropertyRecord, ProtocolList,
    ProtocolRecord, Record, RecordList,
};

/// List Array merge structure
pub use crate::metadata::list_array::ListArray;

// ================================================================================================
// Method Cache and Traversal
// ================================================================================================

/// Inline method cache and deferred reclamation
pub use crate::metadata::cache::{Atomicity, EpochGuard, MethodCache, Reclaimer};

/// Bounded class-tree walks
pub use crate::metadata::traversal::{walk_subclasses, ClassTree};

// ================================================================================================
// Lock Substrate
// ================================================================================================

/// Locks and the process-wide lock registry
pub use crate::sync::{LockRegistry, Monitor, Mutex, RecursiveMutex};
