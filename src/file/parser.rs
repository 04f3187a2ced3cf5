//! Cursor-based binary parser for Go runtime structures.
//!
//! [`Parser`] wraps a byte slice with a position cursor, a byte order and a pointer width.
//! The Go runtime tables decoded by this crate are laid out in the target's native byte order
//! with native pointer sizes, so both are configured once per parser and picked up by
//! [`Parser::read`] and [`Parser::read_ptr`]. Explicit [`Parser::read_le`] and
//! [`Parser::read_be`] remain available for fields with a fixed byte order, such as the
//! big-endian length prefix of pre-1.17 type names.

use crate::{
    file::io::{read_at, read_be_at, read_le_at, read_ptr_at, Endianness, GoIO},
    Result,
};

/// A generic binary data parser for reading Go runtime metadata structures.
///
/// The parser maintains an internal position cursor and provides bounds checking
/// to prevent buffer overruns when reading malformed or truncated data.
///
/// # Examples
///
/// ```rust,no_run
/// use goscope::{Endianness, Parser};
///
/// let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
/// let mut parser = Parser::new(&data).with_endian(Endianness::Big);
///
/// let first = parser.read::<u32>()?;
/// assert_eq!(first, 0x01020304);
///
/// parser.seek(6)?;
/// let last = parser.read_le::<u16>()?;
/// assert_eq!(last, 0x0807);
/// # Ok::<(), goscope::Error>(())
/// ```
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
    /// Byte order used by `read` and `read_ptr`
    endian: Endianness,
    /// Pointer width used by `read_ptr`
    ptr_size: usize,
}

impl<'a> Parser<'a> {
    /// Create a new little-endian, 64-bit [`Parser`] from a byte slice.
    ///
    /// # Arguments
    /// * `data` - The byte slice to read from
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser {
            data,
            position: 0,
            endian: Endianness::Little,
            ptr_size: 8,
        }
    }

    /// Sets the byte order used by [`Parser::read`] and [`Parser::read_ptr`].
    #[must_use]
    pub fn with_endian(mut self, endian: Endianness) -> Self {
        self.endian = endian;
        self
    }

    /// Sets the pointer width used by [`Parser::read_ptr`].
    #[must_use]
    pub fn with_ptr_size(mut self, ptr_size: usize) -> Self {
        self.ptr_size = ptr_size;
        self
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the current position to the specified index.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is beyond the data length.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Move the position forward by the specified number of bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing by step would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let end = self.calc_end_position(step)?;
        self.position = end;
        Ok(())
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Get access to the underlying data buffer.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Advance the position to the next multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the padding would exceed the data length.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        if alignment == 0 {
            return Ok(());
        }
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Read a value in the parser's configured byte order.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading `T` would exceed the data length.
    pub fn read<T: GoIO>(&mut self) -> Result<T> {
        read_at::<T>(self.data, &mut self.position, self.endian)
    }

    /// Read a little-endian value regardless of the configured byte order.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading `T` would exceed the data length.
    pub fn read_le<T: GoIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a big-endian value regardless of the configured byte order.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading `T` would exceed the data length.
    pub fn read_be<T: GoIO>(&mut self) -> Result<T> {
        read_be_at::<T>(self.data, &mut self.position)
    }

    /// Read a pointer-sized value, widened to `u64`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the pointer would exceed the data length.
    pub fn read_ptr(&mut self) -> Result<u64> {
        read_ptr_at(self.data, &mut self.position, self.ptr_size, self.endian)
    }

    /// Read an unsigned LEB128 varint as used by `encoding/binary.Uvarint`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data ends inside the varint, or
    /// [`crate::Error::Malformed`] if the value does not fit into 64 bits.
    pub fn read_uvarint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;

        loop {
            if self.position >= self.data.len() {
                return Err(out_of_bounds_error!());
            }

            let byte = self.data[self.position];
            self.position += 1;

            if shift == 63 && byte > 1 {
                return Err(malformed_error!("Varint overflows 64 bits"));
            }

            value |= u64::from(byte & 0x7F) << shift;
            if (byte & 0x80) == 0 {
                break;
            }

            shift += 7;
            if shift > 63 {
                return Err(malformed_error!("Varint overflows 64 bits"));
            }
        }

        Ok(value)
    }

    /// Read a NUL-terminated UTF-8 string.
    ///
    /// A string running until the end of the data without terminator is accepted.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the bytes are not valid UTF-8.
    pub fn read_string_utf8(&mut self) -> Result<String> {
        let start = self.position;
        let mut end = start;

        while end < self.data.len() && self.data[end] != 0 {
            end += 1;
        }

        let string_data = &self.data[start..end];

        if end < self.data.len() {
            self.position = end + 1;
        } else {
            self.position = end;
        }

        String::from_utf8(string_data.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                start,
                end,
                e.utf8_error()
            )
        })
    }

    /// Remaining bytes after the current position.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Calculate the end position for reading `length` bytes, with bounds checking.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range overflows or exceeds the data.
    pub fn calc_end_position(&self, length: usize) -> Result<usize> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(out_of_bounds_error!())?;

        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(end)
    }

    /// Read `length` raw bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.calc_end_position(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}
