//! Variable-length record lists: the packed storage of method, property, protocol and ivar
//! lists.
//!
//! A record list is one allocation holding a count, an element stride and a packed run of
//! same-stride elements. The stride is stored with the list (`entsize`) and may exceed the
//! logical encoded size of an element, because producers can reserve trailing bytes per
//! element. Indexing therefore always uses the stored stride, never `T::SIZE`.
//!
//! The low bits of the entsize word carry per-list-type flags. Method lists use the low two
//! bits as the "fixed up" marker, set once the list was privatized and sorted by selector.
//!
//! # Key Components
//!
//! - [`Record`] - Encoding of one fixed-width element kind
//! - [`RecordList`] - The packed list, with [`RecordList::iter`], [`RecordList::par_iter`],
//!   [`RecordList::get`] and [`RecordList::duplicate`]
//! - [`MethodRecord`], [`PropertyRecord`], [`ProtocolRecord`], [`IvarRecord`] - The element kinds
//!
//! # Sharing
//!
//! Lists are immutable once published and shared as `Arc<RecordList<T>>` between the
//! read-only record, the List Arrays and any class duplicated from them. Every mutator takes
//! `&mut self`, so changing shared metadata requires [`RecordList::duplicate`] first.
//!
//! # Examples
//!
//! ```rust
//! use objcore::metadata::records::{MethodList, MethodRecord};
//! use objcore::{Imp, Selector, Symbol};
//!
//! let types = Symbol::intern("v16@0:8");
//! let list = MethodList::new(&[
//!     MethodRecord::new(Selector::intern("b"), types, Imp::new(0x20).unwrap()),
//!     MethodRecord::new(Selector::intern("a"), types, Imp::new(0x10).unwrap()),
//! ]);
//!
//! assert_eq!(list.len(), 2);
//! assert_eq!(list.iter().next().unwrap().name.name(), "b");
//!
//! let mut private = list.duplicate();
//! private.set_imp(0, Imp::new(0x30).unwrap())?;
//! assert_eq!(list.get(0).unwrap().imp.value(), 0x20);
//! # Ok::<(), objcore::Error>(())
//! ```

use std::{fmt, marker::PhantomData};

use rayon::prelude::*;

use crate::{
    metadata::selector::{Imp, Selector, Symbol},
    utils::io::{read_le_at, write_le_at},
    Error::OutOfBounds,
    Result,
};

/// One fixed-width element kind of a [`RecordList`].
pub trait Record: Sized + Clone + Send + Sync {
    /// Logical encoded size in bytes; the minimum stride of a list of this kind
    const SIZE: usize;

    /// Bits of the entsize word reserved for list flags
    const FLAG_MASK: u32;

    /// Decode one element at `offset`, advancing `offset` by at most [`Record::SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for short storage and
    /// [`crate::Error::Malformed`] for field values that name nothing.
    fn read(data: &[u8], offset: &mut usize) -> Result<Self>;

    /// Encode this element at `offset`, advancing `offset` by [`Record::SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for short storage.
    fn write(&self, data: &mut [u8], offset: &mut usize) -> Result<()>;
}

/// A method: selector, type encoding and implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRecord {
    /// The method name
    pub name: Selector,
    /// The type encoding
    pub types: Symbol,
    /// The implementation
    pub imp: Imp,
}

impl MethodRecord {
    /// Create a new method record
    #[must_use]
    pub fn new(name: Selector, types: Symbol, imp: Imp) -> Self {
        MethodRecord { name, types, imp }
    }
}

impl Record for MethodRecord {
    const SIZE: usize = 16;
    const FLAG_MASK: u32 = 0x3;

    fn read(data: &[u8], offset: &mut usize) -> Result<Self> {
        let name = read_le_at::<u32>(data, offset)?;
        let types = read_le_at::<u32>(data, offset)?;
        let imp = read_le_at::<u64>(data, offset)?;

        Ok(MethodRecord {
            name: Selector::from_raw(name)
                .ok_or_else(|| malformed_error!("Method record names unknown selector {}", name))?,
            types: Symbol::from_raw(types)
                .ok_or_else(|| malformed_error!("Method record has unknown type encoding {}", types))?,
            imp: usize::try_from(imp)
                .ok()
                .and_then(Imp::new)
                .ok_or_else(|| malformed_error!("Method record has invalid implementation 0x{:x}", imp))?,
        })
    }

    fn write(&self, data: &mut [u8], offset: &mut usize) -> Result<()> {
        write_le_at(data, offset, self.name.value())?;
        write_le_at(data, offset, self.types.value())?;
        write_le_at(data, offset, self.imp.value() as u64)
    }
}

/// A property: name and attribute string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyRecord {
    /// The property name
    pub name: Symbol,
    /// The attribute string (`T@"NSString",C,N`)
    pub attributes: Symbol,
}

impl Record for PropertyRecord {
    const SIZE: usize = 8;
    const FLAG_MASK: u32 = 0;

    fn read(data: &[u8], offset: &mut usize) -> Result<Self> {
        let name = read_le_at::<u32>(data, offset)?;
        let attributes = read_le_at::<u32>(data, offset)?;

        Ok(PropertyRecord {
            name: Symbol::from_raw(name)
                .ok_or_else(|| malformed_error!("Property record names unknown symbol {}", name))?,
            attributes: Symbol::from_raw(attributes)
                .ok_or_else(|| malformed_error!("Property record has unknown attributes {}", attributes))?,
        })
    }

    fn write(&self, data: &mut [u8], offset: &mut usize) -> Result<()> {
        write_le_at(data, offset, self.name.value())?;
        write_le_at(data, offset, self.attributes.value())
    }
}

/// A reference to an adopted protocol, by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolRecord {
    /// The protocol name
    pub name: Symbol,
}

impl Record for ProtocolRecord {
    const SIZE: usize = 4;
    const FLAG_MASK: u32 = 0;

    fn read(data: &[u8], offset: &mut usize) -> Result<Self> {
        let name = read_le_at::<u32>(data, offset)?;
        Ok(ProtocolRecord {
            name: Symbol::from_raw(name)
                .ok_or_else(|| malformed_error!("Protocol record names unknown symbol {}", name))?,
        })
    }

    fn write(&self, data: &mut [u8], offset: &mut usize) -> Result<()> {
        write_le_at(data, offset, self.name.value())
    }
}

/// An instance variable: field offset, name, type encoding, alignment and size.
///
/// The offset is relative to the start of the instance and moves when a superclass grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvarRecord {
    /// Byte offset of the field within an instance
    pub offset: u32,
    /// The ivar name
    pub name: Symbol,
    /// The type encoding
    pub types: Symbol,
    /// Required alignment in bytes, a power of two
    pub alignment: u32,
    /// Field size in bytes
    pub size: u32,
}

impl IvarRecord {
    /// Create a new ivar record
    #[must_use]
    pub fn new(offset: u32, name: Symbol, types: Symbol, alignment: u32, size: u32) -> Self {
        IvarRecord {
            offset,
            name,
            types,
            alignment,
            size,
        }
    }
}

impl Record for IvarRecord {
    const SIZE: usize = 20;
    const FLAG_MASK: u32 = 0;

    fn read(data: &[u8], offset: &mut usize) -> Result<Self> {
        let field_offset = read_le_at::<u32>(data, offset)?;
        let name = read_le_at::<u32>(data, offset)?;
        let types = read_le_at::<u32>(data, offset)?;
        let alignment = read_le_at::<u32>(data, offset)?;
        let size = read_le_at::<u32>(data, offset)?;

        if !alignment.is_power_of_two() {
            return Err(malformed_error!("Ivar record has invalid alignment {}", alignment));
        }

        Ok(IvarRecord {
            offset: field_offset,
            name: Symbol::from_raw(name)
                .ok_or_else(|| malformed_error!("Ivar record names unknown symbol {}", name))?,
            types: Symbol::from_raw(types)
                .ok_or_else(|| malformed_error!("Ivar record has unknown type encoding {}", types))?,
            alignment,
            size,
        })
    }

    fn write(&self, data: &mut [u8], offset: &mut usize) -> Result<()> {
        write_le_at(data, offset, self.offset)?;
        write_le_at(data, offset, self.name.value())?;
        write_le_at(data, offset, self.types.value())?;
        write_le_at(data, offset, self.alignment)?;
        write_le_at(data, offset, self.size)
    }
}

/// A packed, stride-indexed list of records.
pub struct RecordList<T: Record> {
    entsize_and_flags: u32,
    count: u32,
    data: Vec<u8>,
    _phantom: PhantomData<T>,
}

/// Method list
pub type MethodList = RecordList<MethodRecord>;
/// Property list
pub type PropertyList = RecordList<PropertyRecord>;
/// Protocol list
pub type ProtocolList = RecordList<ProtocolRecord>;
/// Ivar list
pub type IvarList = RecordList<IvarRecord>;

impl<T: Record> RecordList<T> {
    /// The stride of a list packed by [`RecordList::new`]
    pub const MIN_ENTSIZE: u32 = {
        assert!(T::SIZE <= u32::MAX as usize);
        T::SIZE as u32
    };

    /// Pack `records` with the minimum stride.
    ///
    /// # Panics
    ///
    /// Panics if `records` holds more than `u32::MAX` elements, the most a list can count.
    /// Use [`RecordList::with_entsize`] to get an error instead.
    #[must_use]
    pub fn new(records: &[T]) -> Self {
        let Ok(count) = u32::try_from(records.len()) else {
            panic!("record list too long - {} elements", records.len());
        };

        let stride = T::SIZE;
        let mut data = vec![0u8; records.len() * stride];
        for (index, record) in records.iter().enumerate() {
            let mut offset = index * stride;
            // The buffer is sized for exactly this many records
            if record.write(&mut data, &mut offset).is_err() {
                unreachable!("record list buffer undersized");
            }
        }

        RecordList {
            entsize_and_flags: Self::MIN_ENTSIZE,
            count,
            data,
            _phantom: PhantomData,
        }
    }

    /// Pack `records` with an explicit stride, leaving the trailing bytes of each element zero.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `entsize` is below [`Record::SIZE`] or
    /// overlaps the flag bits of this list kind.
    pub fn with_entsize(records: &[T], entsize: u32) -> Result<Self> {
        Self::check_entsize(entsize)?;

        let stride = entsize as usize;
        let mut data = vec![0u8; records.len() * stride];
        for (index, record) in records.iter().enumerate() {
            record.write(&mut data, &mut (index * stride))?;
        }

        Ok(RecordList {
            entsize_and_flags: entsize,
            count: u32::try_from(records.len())
                .map_err(|_| malformed_error!("Record list too long - {}", records.len()))?,
            data,
            _phantom: PhantomData,
        })
    }

    /// Adopt a packed list produced by a loader.
    ///
    /// Every element is decoded once so that later reads cannot fail.
    ///
    /// # Arguments
    ///
    /// * `entsize_and_flags` - Element stride combined with the list flags
    /// * `count` - Number of elements
    /// * `data` - Packed elements; may be longer than `count * stride`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `data` is too short, or
    /// [`crate::Error::Malformed`] for a bad stride or an undecodable element.
    pub fn from_bytes(entsize_and_flags: u32, count: u32, data: &[u8]) -> Result<Self> {
        let entsize = entsize_and_flags & !T::FLAG_MASK;
        Self::check_entsize(entsize)?;

        let Some(len) = (count as usize).checked_mul(entsize as usize) else {
            return Err(OutOfBounds);
        };
        if len > data.len() {
            return Err(OutOfBounds);
        }

        let list = RecordList {
            entsize_and_flags,
            count,
            data: data[..len].to_vec(),
            _phantom: PhantomData,
        };

        for index in 0..list.count as usize {
            T::read(&list.data, &mut (index * entsize as usize))?;
        }

        Ok(list)
    }

    fn check_entsize(entsize: u32) -> Result<()> {
        if (entsize as usize) < T::SIZE {
            return Err(malformed_error!(
                "Record stride {} is smaller than the record size {}",
                entsize,
                T::SIZE
            ));
        }
        if entsize & T::FLAG_MASK != 0 {
            return Err(malformed_error!(
                "Record stride {} overlaps the list flag bits 0x{:x}",
                entsize,
                T::FLAG_MASK
            ));
        }
        Ok(())
    }

    /// The element stride in bytes
    #[must_use]
    pub fn entsize(&self) -> u32 {
        self.entsize_and_flags & !T::FLAG_MASK
    }

    /// The list flags stored in the entsize word
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.entsize_and_flags & T::FLAG_MASK
    }

    /// The raw entsize word
    #[must_use]
    pub fn entsize_and_flags(&self) -> u32 {
        self.entsize_and_flags
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Returns `true` if the list has no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The packed element bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decode the element at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len() {
            return None;
        }

        T::read(&self.data, &mut (index * self.entsize() as usize)).ok()
    }

    /// Iterate the elements in stored order.
    #[must_use]
    pub fn iter(&self) -> RecordIter<'_, T> {
        RecordIter {
            list: self,
            index: 0,
        }
    }

    /// Decode the elements in parallel.
    pub fn par_iter(&self) -> impl IndexedParallelIterator<Item = Option<T>> + '_ {
        (0..self.len()).into_par_iter().map(move |index| self.get(index))
    }

    /// Overwrite the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `index` is past the end.
    pub fn set(&mut self, index: usize, record: &T) -> Result<()> {
        if index >= self.len() {
            return Err(OutOfBounds);
        }

        let stride = self.entsize() as usize;
        record.write(&mut self.data, &mut (index * stride))
    }

    /// Produce an independent deep copy.
    ///
    /// Mutating the copy never affects `self`.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        RecordList {
            entsize_and_flags: self.entsize_and_flags,
            count: self.count,
            data: self.data.clone(),
            _phantom: PhantomData,
        }
    }
}

impl RecordList<MethodRecord> {
    /// Flag value marking a privatized, selector-sorted method list
    pub const FIXED_UP: u32 = 0x3;

    /// Returns `true` once the list was privatized and sorted.
    #[must_use]
    pub fn is_fixed_up(&self) -> bool {
        self.flags() == Self::FIXED_UP
    }

    /// Sort by selector value and mark the list fixed up.
    ///
    /// Only called on a list owned by this runtime, never on loader-provided bytes.
    pub fn fix_up(&mut self) {
        self.sort_by_selector();
        self.entsize_and_flags = self.entsize() | Self::FIXED_UP;
    }

    /// Sort the elements by selector value, keeping the first of equal selectors first.
    pub fn sort_by_selector(&mut self) {
        let mut records: Vec<MethodRecord> = self.iter().collect();
        records.sort_by_key(|record| record.name);

        let stride = self.entsize() as usize;
        for (index, record) in records.iter().enumerate() {
            // Same length as before, so every slot exists
            if record.write(&mut self.data, &mut (index * stride)).is_err() {
                unreachable!("method list shrank while sorting");
            }
        }
    }

    /// Find the first method named `sel`.
    ///
    /// Fixed-up lists are binary searched, everything else is scanned linearly.
    #[must_use]
    pub fn find(&self, sel: Selector) -> Option<MethodRecord> {
        if !self.is_fixed_up() {
            return self.iter().find(|method| method.name == sel);
        }

        let (mut low, mut high) = (0usize, self.len());
        while low < high {
            let mid = low + (high - low) / 2;
            let method = self.get(mid)?;
            if method.name < sel {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        self.get(low).filter(|method| method.name == sel)
    }

    /// Position of the first method named `sel`.
    #[must_use]
    pub fn position(&self, sel: Selector) -> Option<usize> {
        self.iter().position(|method| method.name == sel)
    }

    /// Replace the implementation of the method at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `index` is past the end.
    pub fn set_imp(&mut self, index: usize, imp: Imp) -> Result<()> {
        let mut method = self.get(index).ok_or(OutOfBounds)?;
        method.imp = imp;
        self.set(index, &method)
    }
}

impl<T: Record + fmt::Debug> fmt::Debug for RecordList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordList")
            .field("entsize", &self.entsize())
            .field("flags", &self.flags())
            .field("records", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

impl<'a, T: Record> IntoIterator for &'a RecordList<T> {
    type Item = T;
    type IntoIter = RecordIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the elements of a [`RecordList`].
pub struct RecordIter<'a, T: Record> {
    list: &'a RecordList<T>,
    index: usize,
}

impl<T: Record> Iterator for RecordIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.list.get(self.index)?;
        self.index += 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.list.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl<T: Record> ExactSizeIterator for RecordIter<'_, T> {}

#[cfg(test)]
mod tests {
    use rayon::prelude::*;

    use super::*;
    use crate::Error;

    fn method(name: &str, imp: usize) -> MethodRecord {
        MethodRecord::new(
            Selector::intern(name),
            Symbol::intern("v16@0:8"),
            Imp::new(imp).unwrap(),
        )
    }

    #[test]
    fn crafted_stride() {
        let records = [method("records:one", 0x10), method("records:two", 0x20)];
        let list = MethodList::with_entsize(&records, 24).unwrap();

        assert_eq!(list.entsize(), 24);
        assert_eq!(list.as_bytes().len(), 48);
        assert_eq!(list.get(1).unwrap(), records[1]);
        assert!(list.get(2).is_none());

        // Re-adopt the bytes through the loader path, trailing bytes ignored
        let mut bytes = list.as_bytes().to_vec();
        bytes.extend_from_slice(&[0xFF; 8]);
        let adopted = MethodList::from_bytes(24, 2, &bytes).unwrap();
        assert_eq!(adopted.iter().collect::<Vec<_>>(), records);
    }

    #[test]
    fn invalid_strides() {
        let records = [method("records:invalid", 0x10)];
        assert!(matches!(
            MethodList::with_entsize(&records, 8),
            Err(Error::Malformed { .. })
        ));
        assert!(MethodList::with_entsize(&records, 17).is_err());
        assert!(matches!(
            MethodList::from_bytes(16, 4, &[0u8; 32]),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn undecodable_element() {
        // Selector 0 names nothing
        let bytes = [0u8; 16];
        assert!(matches!(
            MethodList::from_bytes(16, 1, &bytes),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn duplicate_is_independent() {
        let list = MethodList::new(&[method("records:dup", 0x10)]);
        let mut copy = list.duplicate();
        copy.set_imp(0, Imp::new(0x99).unwrap()).unwrap();

        assert_eq!(list.get(0).unwrap().imp.value(), 0x10);
        assert_eq!(copy.get(0).unwrap().imp.value(), 0x99);
        assert!(copy.set_imp(1, Imp::new(1).unwrap()).is_err());
    }

    #[test]
    fn fix_up_sorts_and_flags() {
        let c = method("records:fix:c", 3);
        let a = method("records:fix:a", 1);
        let b = method("records:fix:b", 2);
        let mut list = MethodList::new(&[c, a, b]);
        assert!(!list.is_fixed_up());
        assert_eq!(list.find(b.name), Some(b));

        list.fix_up();
        assert!(list.is_fixed_up());
        assert_eq!(list.entsize(), 16);
        assert_eq!(list.flags(), MethodList::FIXED_UP);

        let names: Vec<_> = list.iter().map(|m| m.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);

        assert_eq!(list.find(a.name), Some(a));
        assert_eq!(list.find(c.name), Some(c));
        assert_eq!(list.find(Selector::intern("records:fix:missing")), None);

        // Flags survive a round trip through the loader path
        let adopted = MethodList::from_bytes(list.entsize_and_flags(), 3, list.as_bytes()).unwrap();
        assert!(adopted.is_fixed_up());
    }

    #[test]
    fn parallel_decode() {
        let records: Vec<_> = (0..100)
            .map(|i| method(&format!("records:par:{}", i), i + 1))
            .collect();
        let list = MethodList::new(&records);

        let total: usize = list.par_iter().flatten().map(|m| m.imp.value()).sum();
        assert_eq!(total, (1..=100).sum::<usize>());
        assert_eq!(list.iter().len(), 100);
    }

    #[test]
    fn property_and_protocol_lists() {
        let property = PropertyRecord {
            name: Symbol::intern("title"),
            attributes: Symbol::intern("T@\"NSString\",C,N"),
        };
        let properties = PropertyList::new(&[property]);
        assert_eq!(properties.get(0), Some(property));

        let protocols = ProtocolList::new(&[
            ProtocolRecord { name: Symbol::intern("NSCopying") },
            ProtocolRecord { name: Symbol::intern("NSCoding") },
        ]);
        assert_eq!(protocols.len(), 2);
        assert_eq!(protocols.get(1).unwrap().name.as_str(), "NSCoding");
        assert!(ProtocolList::new(&[]).is_empty());
    }

    #[test]
    fn ivar_lists() {
        let ivar = |offset, name: &str, size| {
            IvarRecord::new(offset, Symbol::intern(name), Symbol::intern("q"), 8, size)
        };
        let list = IvarList::new(&[ivar(8, "_count", 8), ivar(16, "_total", 8)]);
        assert_eq!(list.entsize(), 20);
        assert_eq!(list.get(1).unwrap().offset, 16);
        assert_eq!(list.get(0).unwrap().name.as_str(), "_count");

        let adopted = IvarList::from_bytes(20, 2, list.as_bytes()).unwrap();
        assert_eq!(adopted.iter().collect::<Vec<_>>(), list.iter().collect::<Vec<_>>());

        // Alignment must be a power of two
        let mut bytes = list.as_bytes().to_vec();
        bytes[12..16].copy_from_slice(&3u32.to_le_bytes());
        assert!(matches!(
            IvarList::from_bytes(20, 2, &bytes),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn new_packs_at_minimum_stride() {
        let records = [method("records:min:a", 0x10), method("records:min:b", 0x20)];
        let packed = MethodList::new(&records);
        let explicit = MethodList::with_entsize(&records, MethodList::MIN_ENTSIZE).unwrap();

        assert_eq!(MethodList::MIN_ENTSIZE, 16);
        assert_eq!(packed.entsize_and_flags(), explicit.entsize_and_flags());
        assert_eq!(packed.as_bytes(), explicit.as_bytes());
        assert_eq!(packed.len(), 2);
        assert_eq!(IvarList::MIN_ENTSIZE, 20);
    }
}
