//! Executable container formats.
//!
//! Go produces ELF, PE and Mach-O executables. Each of them is wrapped by a type implementing
//! the [`Container`] trait, which exposes the handful of facts the metadata decoders rely on:
//! the section list, symbol lookup, the entry point, pointer width, byte order and the
//! Go-style architecture and OS names.
//!
//! The container kind is chosen by [`sniff`], which only looks at fixed-offset signatures.
//! Header parsing itself is delegated to `goblin`; the parsed headers are copied into owned
//! [`Section`] records so that no container keeps a borrow on the input buffer.
//!
//! # Key Components
//!
//! - [`Container`] - Capability trait shared by all formats
//! - [`Section`] / [`SectionFlags`] - Normalized section table entries
//! - [`ContainerKind`] - Result of signature sniffing
//! - [`parse`] - Sniff and parse in one step

mod elf;
mod macho;
mod pe;

pub use elf::ElfContainer;
pub use macho::MachOContainer;
pub use pe::PeContainer;

use bitflags::bitflags;
use strum::Display;

use crate::{file::io::Endianness, Error::UnsupportedFormat, Result};

bitflags! {
    /// Normalized section attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionFlags: u8 {
        /// The section contains executable code
        const EXECUTABLE = 0x01;
        /// The section is writable at runtime
        const WRITABLE = 0x02;
        /// The section has content stored in the file (not zero-fill)
        const INITIALIZED = 0x04;
    }
}

/// A section of the loaded image, normalized across container formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name, e.g. `.gopclntab` or `__gopclntab`
    pub name: String,
    /// Virtual address of the first byte
    pub address: u64,
    /// Size of the section in memory
    pub size: u64,
    /// Offset of the section content in the file
    pub offset: u64,
    /// Number of bytes backed by the file, never larger than `size`
    pub file_size: u64,
    /// Section attributes
    pub flags: SectionFlags,
}

impl Section {
    /// Returns `true` if `va` lies within the in-memory range of this section.
    #[must_use]
    pub fn contains(&self, va: u64) -> bool {
        va >= self.address && va - self.address < self.size
    }

    /// Returns `true` if `va` lies within the part of this section stored in the file.
    #[must_use]
    pub fn contains_file_backed(&self, va: u64) -> bool {
        va >= self.address && va - self.address < self.file_size
    }

    /// Returns `true` if the section has content in the file.
    #[must_use]
    pub fn is_file_backed(&self) -> bool {
        self.flags.contains(SectionFlags::INITIALIZED) && self.file_size > 0
    }

    /// Returns `true` if the section holds code.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.flags.contains(SectionFlags::EXECUTABLE)
    }

    /// Returns `true` if the section is writable at runtime.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.flags.contains(SectionFlags::WRITABLE)
    }
}

/// The supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ContainerKind {
    /// Executable and Linkable Format
    #[strum(serialize = "ELF")]
    Elf,
    /// Portable Executable
    #[strum(serialize = "PE")]
    Pe,
    /// Thin (single architecture) Mach-O
    #[strum(serialize = "Mach-O")]
    MachO,
}

/// Capabilities every executable container provides to the metadata decoders.
pub trait Container: Send + Sync {
    /// The format of this container.
    fn kind(&self) -> ContainerKind;

    /// All sections, in header order.
    fn sections(&self) -> &[Section];

    /// Virtual address of the entry point, `0` if none.
    fn entry_point(&self) -> u64;

    /// Pointer width of the target in bytes (4 or 8).
    fn pointer_width(&self) -> usize;

    /// Byte order of the target.
    fn endianness(&self) -> Endianness;

    /// GOARCH-style architecture name (`amd64`, `arm64`, `386`, ...).
    fn arch(&self) -> &str;

    /// GOOS-style operating system name (`linux`, `windows`, `darwin`, ...).
    fn os(&self) -> &str;

    /// Virtual address of the named symbol, if the container carries a symbol table.
    fn symbol(&self, name: &str) -> Option<u64>;

    /// Looks up a section by exact name.
    fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections().iter().find(|section| section.name == name)
    }

    /// Looks up the section whose in-memory range contains `va`.
    ///
    /// File-backed sections win over zero-fill ones when ranges overlap.
    fn section_by_address(&self, va: u64) -> Option<&Section> {
        self.sections()
            .iter()
            .find(|section| section.contains_file_backed(va))
            .or_else(|| self.sections().iter().find(|section| section.contains(va)))
    }
}

/// Determines the container format from fixed-offset signatures.
///
/// # Errors
/// Returns [`crate::Error::UnsupportedFormat`] if no supported signature matches. Fat Mach-O
/// archives are not supported.
pub fn sniff(data: &[u8]) -> Result<ContainerKind> {
    if data.starts_with(b"\x7fELF") {
        return Ok(ContainerKind::Elf);
    }

    if data.starts_with(b"MZ") && data.len() >= 0x40 {
        let pe_offset = u32::from_le_bytes([data[0x3c], data[0x3d], data[0x3e], data[0x3f]]);
        let pe_offset = pe_offset as usize;
        if let Some(signature) = pe_offset
            .checked_add(4)
            .and_then(|end| data.get(pe_offset..end))
        {
            if signature == b"PE\0\0" {
                return Ok(ContainerKind::Pe);
            }
        }
    }

    if data.len() >= 4 {
        let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        if matches!(magic, 0xFEED_FACE | 0xFEED_FACF | 0xCEFA_EDFE | 0xCFFA_EDFE) {
            return Ok(ContainerKind::MachO);
        }
    }

    Err(UnsupportedFormat)
}

/// Sniffs the container format and parses the headers into an owned [`Container`].
///
/// # Errors
/// Returns [`crate::Error::UnsupportedFormat`] for unknown formats and
/// [`crate::Error::GoblinErr`] or [`crate::Error::Malformed`] for damaged headers.
pub fn parse(data: &[u8]) -> Result<Box<dyn Container>> {
    let container: Box<dyn Container> = match sniff(data)? {
        ContainerKind::Elf => Box::new(ElfContainer::parse(data)?),
        ContainerKind::Pe => Box::new(PeContainer::parse(data)?),
        ContainerKind::MachO => Box::new(MachOContainer::parse(data)?),
    };

    if container.pointer_width() != 4 && container.pointer_width() != 8 {
        return Err(malformed_error!(
            "Unsupported pointer width - {}",
            container.pointer_width()
        ));
    }

    Ok(container)
}
