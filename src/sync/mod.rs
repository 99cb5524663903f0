//! Lock substrate used by every mutating metadata operation.
//!
//! Three primitives, all built on `parking_lot` and all registered with the process-wide
//! [`LockRegistry`] for ownership debugging and fork handling.
//!
//! # Key Components
//!
//! - [`Mutex`] - Exclusive lock with address-ordered [`Mutex::lock_two`] and a conditional
//!   [`Mutex::lock_with`] form
//! - [`RecursiveMutex`] - Re-entrant lock with guard-less `lock_raw` / `try_unlock`
//! - [`Monitor`] - Lock plus condition variable with `wait`, `notify` and `notify_all`
//! - [`LockRegistry`] - Ownership tracking and `prepare_fork` / `parent_after_fork` /
//!   `child_after_fork` hooks
//!
//! # Fork Handling
//!
//! A process that forks while another thread holds a metadata lock would hand the child a
//! lock nobody can release. Install the registry hooks around `fork(2)`:
//!
//! ```rust,ignore
//! let registry = objcore::sync::LockRegistry::global();
//! registry.prepare_fork()?;
//! match unsafe { libc::fork() } {
//!     0 => registry.child_after_fork(),
//!     _ => registry.parent_after_fork(),
//! }
//! ```
//!
//! Locks created with [`Mutex::new_fork_unsafe`] are skipped by the hooks.

mod monitor;
mod mutex;
mod recursive;
mod registry;

pub use monitor::{Monitor, MonitorGuard};
pub use mutex::{LockedPair, Mutex, MutexGuard};
pub use recursive::{RecursiveGuard, RecursiveMutex};
pub use registry::{LockId, LockKind, LockRegistry};
