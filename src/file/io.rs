//! Low-level byte order and safe reading utilities for executable parsing.
//!
//! This module provides endian-aware, bounds-checked reading of primitive values from byte
//! buffers. Go binaries exist for both little-endian (amd64, arm64, 386, ...) and big-endian
//! (ppc64, s390x, mips) targets, and the build info blob carries its own byte order flag, so
//! every reader used by the metadata decoders is parameterised by an [`Endianness`].
//!
//! # Key Components
//!
//! - [`crate::file::io::GoIO`] - Trait defining endian-aware decoding for primitive types
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_be`] - Read from buffer start
//! - [`crate::file::io::read_le_at`] / [`crate::file::io::read_be_at`] - Read at an offset with auto-advance
//! - [`crate::file::io::read_at`] - Read at an offset with a runtime-selected byte order
//! - [`crate::file::io::read_ptr_at`] - Read a 4 or 8 byte pointer, widened to `u64`
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use goscope::file::io::{read_at, read_ptr_at, Endianness};
//!
//! let data = [0x00, 0x10, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00];
//! let mut offset = 0;
//! let va = read_ptr_at(&data, &mut offset, 8, Endianness::Little)?;
//! assert_eq!(va, 0x401000);
//! assert_eq!(offset, 8);
//! # Ok::<(), goscope::Error>(())
//! ```
//!
//! # Error Handling
//!
//! All reading functions return [`crate::Result<T>`] and will return
//! [`crate::Error::OutOfBounds`] if there are insufficient bytes in the buffer.

use serde::Serialize;
use strum::Display;

use crate::Result;

/// Byte order of multi-byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
pub enum Endianness {
    /// Least significant byte first
    #[strum(serialize = "LittleEndian")]
    Little,
    /// Most significant byte first
    #[strum(serialize = "BigEndian")]
    Big,
}

/// Trait for implementing type-specific safe binary data reading operations.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait GoIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_go_io {
    ($($ty:ty),*) => {
        $(
            impl GoIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }
            }
        )*
    };
}

impl_go_io!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Safely reads a value of type `T` in little-endian byte order from the start of a buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: GoIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: GoIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let read = take::<T>(data, offset)?;
    Ok(T::from_le_bytes(read))
}

/// Safely reads a value of type `T` in big-endian byte order from the start of a buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be<T: GoIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_be_at(data, &mut offset)
}

/// Safely reads a value of type `T` in big-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be_at<T: GoIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let read = take::<T>(data, offset)?;
    Ok(T::from_be_bytes(read))
}

/// Reads a value of type `T` at `offset` in the given byte order, advancing the offset.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_at<T: GoIO>(data: &[u8], offset: &mut usize, endian: Endianness) -> Result<T> {
    match endian {
        Endianness::Little => read_le_at(data, offset),
        Endianness::Big => read_be_at(data, offset),
    }
}

/// Reads a pointer-sized unsigned value at `offset` and widens it to `u64`.
///
/// Go binaries only use 4 and 8 byte pointers; any other width is rejected.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes, or
/// [`crate::Error::Malformed`] for an unsupported pointer width.
pub fn read_ptr_at(
    data: &[u8],
    offset: &mut usize,
    ptr_size: usize,
    endian: Endianness,
) -> Result<u64> {
    match ptr_size {
        4 => Ok(u64::from(read_at::<u32>(data, offset, endian)?)),
        8 => read_at::<u64>(data, offset, endian),
        other => Err(malformed_error!("Unsupported pointer size - {}", other)),
    }
}

fn take<T: GoIO>(data: &[u8], offset: &mut usize) -> Result<T::Bytes> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;
    Ok(read)
}
