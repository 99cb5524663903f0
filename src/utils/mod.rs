//! Shared low-level helpers.

/// Little-endian field access on byte buffers
pub(crate) mod io;
