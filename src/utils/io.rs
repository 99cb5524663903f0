//! Bounds-checked little-endian field access for packed record storage.
//!
//! Record lists keep their entries as raw bytes with a per-list stride (see
//! [`crate::metadata::records`]). The helpers here read and write the fixed-width fields
//! of a record at a running offset, failing with [`crate::Error::OutOfBounds`] instead of
//! panicking when the storage is too short.
//!
//! # Key Components
//!
//! - [`FieldIO`] - Conversion between a primitive and its little-endian byte array
//! - [`read_le_at`] - Read a field at an offset and advance the offset
//! - [`write_le_at`] - Write a field at an offset and advance the offset
//!
//! # Examples
//!
//! ```rust,ignore
//! use crate::utils::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 12];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 7u32)?;
//! write_le_at(&mut data, &mut offset, 0x1000u64)?;
//!
//! let mut offset = 0;
//! assert_eq!(read_le_at::<u32>(&data, &mut offset)?, 7);
//! assert_eq!(read_le_at::<u64>(&data, &mut offset)?, 0x1000);
//! ```

use crate::{Error::OutOfBounds, Result};

/// A primitive that can be stored as a little-endian field.
pub trait FieldIO: Sized {
    /// The fixed-size byte representation
    type Bytes: AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode into little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_field_io {
    ($($ty:ty => $len:literal),* $(,)?) => {
        $(
            impl FieldIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_field_io!(u8 => 1, u16 => 2, u32 => 4, u64 => 8);

/// Read a `T` at `offset` and advance `offset` past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn read_le_at<T: FieldIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Write `value` at `offset` and advance `offset` past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn write_le_at<T: FieldIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn sequential_fields() {
        let mut data = [0u8; 15];
        let mut offset = 0;
        write_le_at(&mut data, &mut offset, 0xABu8).unwrap();
        write_le_at(&mut data, &mut offset, 0x0102u16).unwrap();
        write_le_at(&mut data, &mut offset, 0x0304_0506u32).unwrap();
        write_le_at(&mut data, &mut offset, 0x0708_090A_0B0C_0D0Eu64).unwrap();
        assert_eq!(offset, 15);
        assert_eq!(&data[..3], &[0xAB, 0x02, 0x01]);

        let mut offset = 0;
        assert_eq!(read_le_at::<u8>(&data, &mut offset).unwrap(), 0xAB);
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 0x0102);
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 0x0304_0506);
        assert_eq!(
            read_le_at::<u64>(&data, &mut offset).unwrap(),
            0x0708_090A_0B0C_0D0E
        );
    }

    #[test]
    fn out_of_bounds() {
        let data = [0u8; 3];
        let mut offset = 0;
        assert!(matches!(read_le_at::<u32>(&data, &mut offset), Err(Error::OutOfBounds)));
        assert_eq!(offset, 0);

        let mut offset = usize::MAX;
        assert!(read_le_at::<u8>(&data, &mut offset).is_err());

        let mut buffer = [0u8; 7];
        let mut offset = 0;
        assert!(write_le_at(&mut buffer, &mut offset, 1u64).is_err());
        assert_eq!(buffer, [0u8; 7]);
    }
}
