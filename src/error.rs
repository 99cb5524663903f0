use thiserror::Error;

use crate::metadata::{class::ClassId, selector::Selector};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The object-model core has very few recoverable failure modes. Most of its "errors" are
/// either silent cache misses (a miss simply falls through to the slow method walk) or
/// fatal corruption, which never surfaces as a value and terminates the process instead. The variants
/// below cover malformed loader input, misuse of the class lifecycle API and detected
/// corruption of the realized-class tree.
///
/// # Error Categories
///
/// ## Metadata Input Errors
/// - [`Error::Malformed`] - A record list or class record violates its structural rules
/// - [`Error::OutOfBounds`] - A record read or write ran past the end of its storage
///
/// ## Class Lifecycle Errors
/// - [`Error::ClassNotFound`] - A class id does not refer to a registered class
/// - [`Error::ClassNameInUse`] - A class with the same name is already registered
/// - [`Error::AlreadyRealized`] - Realization was requested twice for one class
/// - [`Error::NotRealized`] - The operation requires a realized class
/// - [`Error::SuperclassNotRealized`] - A class was realized before its superclass
/// - [`Error::AlreadyInitialized`] - Initialization was entered after it completed
/// - [`Error::MethodNotFound`] - No implementation exists for a selector
///
/// ## Structural and Environment Errors
/// - [`Error::CorruptClassTree`] - A class-tree walk exceeded its node budget
/// - [`Error::InvalidConfig`] - A [`crate::RuntimeConfig`] failed validation
/// - [`Error::ForkUnsafe`] - A fork-safe lock was held by the forking thread
///
/// # Examples
///
/// ```rust
/// use objcore::{ClassRegistry, Error};
///
/// let registry = ClassRegistry::default();
/// let unknown = objcore::ClassId::new(42);
///
/// match registry.realize(unknown) {
///     Err(Error::ClassNotFound(id)) => println!("no class {}", id),
///     Err(e) => println!("Other error: {}", e),
///     Ok(_) => unreachable!(),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Metadata handed over by the loader is structurally damaged.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted on the packed storage of a record list.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The class id does not belong to this registry.
    #[error("No class registered with id {0}")]
    ClassNotFound(ClassId),

    /// A class with this name is already registered.
    #[error("A class named '{0}' is already registered")]
    ClassNameInUse(String),

    /// The class was already realized (or is being realized by another thread).
    ///
    /// Realization happens at most once per class for the lifetime of the registry.
    #[error("Class '{0}' is already realized")]
    AlreadyRealized(String),

    /// The operation needs the read-write record, but the class is not realized yet.
    #[error("Class '{0}' is not realized")]
    NotRealized(String),

    /// A class can only be realized after its superclass.
    #[error("The superclass of '{0}' is not realized")]
    SuperclassNotRealized(String),

    /// Initialization was entered for a class that already finished initializing.
    #[error("Class '{0}' is already initialized")]
    AlreadyInitialized(String),

    /// No implementation for the selector exists anywhere in the class hierarchy.
    #[error("Class '{class}' does not implement {selector}")]
    MethodNotFound {
        /// Name of the receiving class
        class: String,
        /// The selector which could not be resolved
        selector: Selector,
    },

    /// A walk over the realized-class tree visited more nodes than any sane tree holds.
    ///
    /// This indicates a cycle in the sibling/child links and therefore memory corruption.
    #[error("Memory corruption in class list - walk from '{class}' exceeded {budget} nodes")]
    CorruptClassTree {
        /// Name of the class the walk started at
        class: String,
        /// The node budget that was exhausted
        budget: usize,
    },

    /// A runtime configuration value is not usable.
    #[error("Invalid runtime configuration - {0}")]
    InvalidConfig(String),

    /// A lock that participates in fork handling was held by the forking thread.
    #[error("Lock '{0}' is held across fork")]
    ForkUnsafe(String),
}
