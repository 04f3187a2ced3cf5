//! Executable file abstraction and virtual address translation.
//!
//! This module loads an executable from disk or memory, identifies its container format and
//! provides bounds-checked access to its content by virtual address. Every pointer found inside
//! Go runtime tables is a VA; all of them are dereferenced through [`File::va_to_offset`], which
//! walks VA → section → file offset and refuses anything outside the file-backed part of a
//! section.
//!
//! # Key Components
//!
//! ## Core Types
//! - [`crate::file::File`] - Loaded executable with section and symbol access
//! - [`crate::file::Backend`] - Trait for different data sources (disk files, memory buffers)
//!
//! ## Parsing Infrastructure
//! - [`crate::file::parser::Parser`] - Cursor-based reader configured for the target
//! - [`crate::file::io`] - Low-level endian-aware read helpers
//! - [`crate::file::container`] - ELF, PE and Mach-O header parsing
//!
//! # Examples
//!
//! ```rust,no_run
//! use goscope::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("server.bin"))?;
//! println!("{} {}/{}", file.kind(), file.os(), file.arch());
//!
//! if let Some(section) = file.section_by_name(".gopclntab") {
//!     let header = file.slice_at(section.address, 8)?;
//!     println!("pclntab magic: {:02x?}", &header[..4]);
//! }
//! # Ok::<(), goscope::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! [`File`] is immutable after loading and can be shared across threads.

pub mod container;
pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{Error::Empty, Result};
use container::{Container, ContainerKind, Section};
use io::Endianness;
use memory::Memory;
use parser::Parser;
use physical::Physical;

/// Backend trait for file data sources.
///
/// This trait abstracts over the source of executable data, allowing for both in-memory and
/// on-disk representations. All implementations must be thread-safe.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// A loaded executable.
///
/// Wraps the raw bytes together with the parsed container headers. Loading fails only if the
/// input is empty or not a supported container; whether the file actually is a Go binary is
/// decided by the metadata layer.
///
/// # Examples
///
/// ```rust,no_run
/// use goscope::File;
/// use std::fs;
///
/// let data = fs::read("server.bin")?;
/// let file = File::from_mem(data)?;
///
/// for section in file.sections() {
///     println!("{:<16} 0x{:x} ({} bytes)", section.name, section.address, section.size);
/// }
/// # Ok::<(), goscope::Error>(())
/// ```
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// The parsed container headers.
    container: Box<dyn Container>,
}

impl File {
    /// Loads an executable from the given path.
    ///
    /// The file is memory-mapped read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or opened
    /// - The file is empty
    /// - The file is not an ELF, PE or thin Mach-O executable
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Loads an executable from a memory buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty or not a supported container.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let container = container::parse(data.data())?;
        log::debug!(
            "Loaded {} container ({}/{}, {}-bit, {})",
            container.kind(),
            container.os(),
            container.arch(),
            container.pointer_width() * 8,
            container.endianness()
        );

        Ok(File {
            data: Box::new(data),
            container,
        })
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the file has a length of zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// Returns the raw file content.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Returns a slice of the file at the given offset and length.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the file.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// The detected container format.
    #[must_use]
    pub fn kind(&self) -> ContainerKind {
        self.container.kind()
    }

    /// All sections of the image.
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        self.container.sections()
    }

    /// Looks up a section by exact name.
    #[must_use]
    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.container.section_by_name(name)
    }

    /// Looks up the section containing `va`.
    #[must_use]
    pub fn section_by_address(&self, va: u64) -> Option<&Section> {
        self.container.section_by_address(va)
    }

    /// Virtual address of the entry point.
    #[must_use]
    pub fn entry_point(&self) -> u64 {
        self.container.entry_point()
    }

    /// Pointer width of the target in bytes.
    #[must_use]
    pub fn pointer_width(&self) -> usize {
        self.container.pointer_width()
    }

    /// Byte order of the target.
    #[must_use]
    pub fn endianness(&self) -> Endianness {
        self.container.endianness()
    }

    /// GOARCH-style architecture name.
    #[must_use]
    pub fn arch(&self) -> &str {
        self.container.arch()
    }

    /// GOOS-style operating system name.
    #[must_use]
    pub fn os(&self) -> &str {
        self.container.os()
    }

    /// Virtual address of a named symbol.
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<u64> {
        self.container.symbol(name)
    }

    /// Converts a virtual address to a file offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the VA is not backed by file content.
    pub fn va_to_offset(&self, va: u64) -> Result<usize> {
        let section = self
            .sections()
            .iter()
            .find(|section| section.contains_file_backed(va))
            .ok_or(out_of_bounds_error!())?;

        let offset = section
            .offset
            .checked_add(va - section.address)
            .ok_or(out_of_bounds_error!())?;

        usize::try_from(offset).map_err(|_| out_of_bounds_error!())
    }

    /// Returns the file content of a section.
    ///
    /// Zero-fill sections yield an empty slice.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the section header points outside the file.
    pub fn section_data(&self, section: &Section) -> Result<&[u8]> {
        if !section.is_file_backed() {
            return Ok(&[]);
        }

        let offset = usize::try_from(section.offset).map_err(|_| out_of_bounds_error!())?;
        let len = usize::try_from(section.file_size).map_err(|_| out_of_bounds_error!())?;
        self.data.data_slice(offset, len)
    }

    /// Returns the bytes from `va` to the end of its section's file-backed content.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the VA is not backed by file content.
    pub fn bytes_from(&self, va: u64) -> Result<&[u8]> {
        let section = self
            .sections()
            .iter()
            .find(|section| section.contains_file_backed(va))
            .ok_or(out_of_bounds_error!())?;

        let data = self.section_data(section)?;
        let start = usize::try_from(va - section.address).map_err(|_| out_of_bounds_error!())?;
        data.get(start..).ok_or(out_of_bounds_error!())
    }

    /// Returns `len` bytes starting at `va`.
    ///
    /// The range must lie within a single section.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is not entirely backed by file content.
    pub fn slice_at(&self, va: u64, len: usize) -> Result<&[u8]> {
        let bytes = self.bytes_from(va)?;
        bytes.get(..len).ok_or(out_of_bounds_error!())
    }

    /// Creates a [`Parser`] positioned at `va`, configured with the target's byte order and
    /// pointer width.
    ///
    /// The parser covers the rest of the containing section.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the VA is not backed by file content.
    pub fn parser_at(&self, va: u64) -> Result<Parser<'_>> {
        Ok(Parser::new(self.bytes_from(va)?)
            .with_endian(self.endianness())
            .with_ptr_size(self.pointer_width()))
    }

    /// Reads a pointer-sized value at `va`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the VA is not backed by file content.
    pub fn read_ptr(&self, va: u64) -> Result<u64> {
        self.parser_at(va)?.read_ptr()
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .field("arch", &self.arch())
            .field("os", &self.os())
            .field("sections", &self.sections().len())
            .finish()
    }
}
