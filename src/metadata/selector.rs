//! Interned method names, symbols and implementation handles.
//!
//! A [`Selector`] is a process-wide unique identifier for a method name. Names are interned
//! once, after which selectors compare, hash and probe as plain integers; the inline method
//! cache uses the selector value directly as its hash. The value `0` is never handed out
//! because it marks an empty cache bucket.
//!
//! [`Symbol`] interns every other string the metadata refers to (type encodings, property
//! attributes, protocol names) in a separate table, so symbol values never collide with
//! the dense selector space.
//!
//! # Key Components
//!
//! - [`Selector`] - Interned method name
//! - [`Symbol`] - Interned auxiliary string
//! - [`Imp`] - Opaque, non-zero implementation handle bound to a (class, selector) pair
//!
//! # Thread Safety
//!
//! Interning is lock-free for lookups of existing names (`DashMap` shard read locks) and
//! stable: the name behind a selector never moves once interned.

use std::{fmt, num::NonZeroUsize, sync::OnceLock};

use dashmap::DashMap;

/// String interner shared by the selector and symbol tables.
struct Interner {
    ids: DashMap<String, u32>,
    names: boxcar::Vec<String>,
}

impl Interner {
    fn new() -> Self {
        Interner {
            ids: DashMap::new(),
            names: boxcar::Vec::new(),
        }
    }

    fn intern(&self, name: &str) -> u32 {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }

        // The entry lock serializes concurrent first-time interning of the same name
        *self.ids.entry(name.to_string()).or_insert_with(|| {
            let index = self.names.push(name.to_string());
            u32::try_from(index + 1).unwrap_or_else(|_| fatal!("selector table overflow"))
        })
    }

    fn lookup(&self, name: &str) -> Option<u32> {
        self.ids.get(name).map(|id| *id)
    }

    fn name(&self, id: u32) -> Option<&str> {
        let index = (id as usize).checked_sub(1)?;
        self.names.get(index).map(String::as_str)
    }

    fn len(&self) -> usize {
        self.names.count()
    }
}

static SELECTORS: OnceLock<Interner> = OnceLock::new();
static SYMBOLS: OnceLock<Interner> = OnceLock::new();

fn selectors() -> &'static Interner {
    SELECTORS.get_or_init(Interner::new)
}

fn symbols() -> &'static Interner {
    SYMBOLS.get_or_init(Interner::new)
}

/// An interned method name.
///
/// # Examples
///
/// ```rust
/// use objcore::Selector;
///
/// let first = Selector::intern("initWithFrame:");
/// let second = Selector::intern("initWithFrame:");
/// assert_eq!(first, second);
/// assert_eq!(first.name(), "initWithFrame:");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Selector(u32);

impl Selector {
    /// Return the selector for `name`, interning it on first use.
    #[must_use]
    pub fn intern(name: &str) -> Self {
        Selector(selectors().intern(name))
    }

    /// Return the selector for `name` only if it was interned before.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        selectors().lookup(name).map(Selector)
    }

    /// Rebuild a selector from its raw value.
    ///
    /// Returns `None` for `0` and for values no name was interned under.
    #[must_use]
    pub fn from_raw(value: u32) -> Option<Self> {
        selectors().name(value).map(|_| Selector(value))
    }

    /// The raw, non-zero selector value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The interned method name
    #[must_use]
    pub fn name(&self) -> &'static str {
        selectors().name(self.0).unwrap_or("<unknown>")
    }

    /// Number of selectors interned in this process
    #[must_use]
    pub fn interned_count() -> usize {
        selectors().len()
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({}, {:?})", self.0, self.name())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An interned auxiliary string (type encoding, property attributes, protocol name).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl Symbol {
    /// Return the symbol for `name`, interning it on first use.
    #[must_use]
    pub fn intern(name: &str) -> Self {
        Symbol(symbols().intern(name))
    }

    /// Rebuild a symbol from its raw value, if one was interned under it.
    #[must_use]
    pub fn from_raw(value: u32) -> Option<Self> {
        symbols().name(value).map(|_| Symbol(value))
    }

    /// The raw symbol value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The interned string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        symbols().name(self.0).unwrap_or("<unknown>")
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque implementation handle.
///
/// The core never calls through an `Imp`; it only stores and returns it. Zero is not a
/// valid implementation, which lets an atomic cache bucket use `0` as "unset".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Imp(NonZeroUsize);

impl Imp {
    /// Wrap a raw entry point; `None` for zero.
    #[must_use]
    pub fn new(value: usize) -> Option<Self> {
        NonZeroUsize::new(value).map(Imp)
    }

    /// Use the address of a function as its implementation handle.
    #[must_use]
    pub fn from_fn(entry: fn()) -> Self {
        // Function pointers are never null
        Imp(NonZeroUsize::new(entry as usize).unwrap_or(NonZeroUsize::MIN))
    }

    /// The raw entry point value
    #[must_use]
    pub fn value(&self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for Imp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Imp(0x{:x})", self.0)
    }
}

impl fmt::Display for Imp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}
