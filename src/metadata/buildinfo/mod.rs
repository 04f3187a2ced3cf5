//! Build information extraction.
//!
//! Since Go 1.13 the linker embeds a build information blob: the toolchain version plus the
//! module information shown by `go version -m`. The blob starts with a 32-byte header:
//!
//! ```text
//! 0   "\xff Go buildinf:"  (14 bytes)
//! 14  pointer size
//! 15  flags (bit 0: big endian, bit 1: inline strings)
//! 16  version pointer / module info pointer  (pointer format)
//! 32  varint-prefixed version and module info strings  (inline format, Go 1.18+)
//! ```
//!
//! In the pointer format both pointers lead to Go string headers (`data`, `len`), which are
//! dereferenced through the section table. The header sits at a 16-byte aligned address inside
//! `.go.buildinfo` / `__go_buildinfo`, or inside a writable data section for older releases.
//!
//! # Examples
//!
//! ```rust,no_run
//! use goscope::{metadata::buildinfo::BuildInfoReader, File};
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("server.bin"))?;
//! let mut reader = BuildInfoReader::new(&file);
//! if let Err(error) = reader.read() {
//!     eprintln!("build info incomplete: {}", error);
//! }
//! let info = reader.into_inner();
//! println!("{} built with {}", info.path, info.go_version);
//! # Ok::<(), goscope::Error>(())
//! ```

pub mod modinfo;

use serde::Serialize;

use crate::{
    file::{container::Section, io::Endianness, parser::Parser, File},
    Error::{BuildInfoAbsent, BuildInfoTruncated},
    Result,
};
use modinfo::{strip_sentinels, ModInfoParser};

/// Magic at the start of the build information header.
pub const BUILDINFO_MAGIC: &[u8; 14] = b"\xff Go buildinf:";

/// Size of the build information header.
const HEADER_SIZE: usize = 32;

/// Alignment of the build information header.
const HEADER_ALIGN: u64 = 16;

/// Sections dedicated to the build information blob.
const BUILDINFO_SECTIONS: [&str; 2] = [".go.buildinfo", "__go_buildinfo"];

/// Upper bound for strings referenced by the pointer format.
const MAX_STRING_LEN: u64 = 1 << 24;

const FLAG_BIG_ENDIAN: u8 = 0x1;
const FLAG_INLINE: u8 = 0x2;

/// A module as recorded in the build information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Module {
    /// Module path
    pub path: String,
    /// Module version, `(devel)` for the main module of local builds
    pub version: String,
    /// Checksum from `go.sum`, empty for the main module
    pub sum: String,
    /// Replacement from a `replace` directive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace: Option<Box<Module>>,
}

/// A key/value build setting such as `-ldflags` or `GOOS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Setting {
    /// Setting name
    pub key: String,
    /// Setting value, unquoted
    pub value: String,
}

/// Decoded build information.
///
/// All fields are empty if the binary carries no build information blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BuildInfo {
    /// Toolchain version, e.g. `go1.21.4`
    pub go_version: String,
    /// Package path of the main package
    pub path: String,
    /// The main module
    pub main: Module,
    /// Module dependencies in build order
    pub deps: Vec<Module>,
    /// Build settings in recorded order
    pub settings: Vec<Setting>,
}

impl BuildInfo {
    /// Looks up a build setting by key.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings
            .iter()
            .find(|setting| setting.key == key)
            .map(|setting| setting.value.as_str())
    }
}

/// Locates and decodes the build information blob of a file.
///
/// Decoding keeps whatever was read before a failure: after an error from [`Self::read`],
/// [`Self::into_inner`] still returns the decodable prefix.
pub struct BuildInfoReader<'a> {
    file: &'a File,
    info: BuildInfo,
}

impl<'a> BuildInfoReader<'a> {
    /// Creates a reader for `file`.
    #[must_use]
    pub fn new(file: &'a File) -> Self {
        BuildInfoReader {
            file,
            info: BuildInfo::default(),
        }
    }

    /// Locates the blob and decodes it into the reader.
    ///
    /// # Errors
    /// Returns [`crate::Error::BuildInfoAbsent`] if no header is found and
    /// [`crate::Error::BuildInfoTruncated`] if the blob could only be partially decoded.
    pub fn read(&mut self) -> Result<()> {
        let va = self.locate().ok_or(BuildInfoAbsent)?;
        log::debug!("Build info header at 0x{:x}", va);

        let header = self.file.bytes_from(va)?;
        let ptr_size = usize::from(header[14]);
        let flags = header[15];

        let (version, raw_modinfo) = if flags & FLAG_INLINE != 0 {
            let mut parser = Parser::new(header);
            parser.seek(HEADER_SIZE)?;

            let version = read_inline(&mut parser)
                .map_err(|e| BuildInfoTruncated(format!("version string: {}", e)))?;
            self.info.go_version = String::from_utf8_lossy(version).into_owned();

            let modinfo = read_inline(&mut parser)
                .map_err(|e| BuildInfoTruncated(format!("module info: {}", e)))?;
            (self.info.go_version.clone(), modinfo.to_vec())
        } else {
            if ptr_size != 4 && ptr_size != 8 {
                return Err(BuildInfoTruncated(format!(
                    "invalid pointer size {}",
                    ptr_size
                )));
            }
            let endian = if flags & FLAG_BIG_ENDIAN != 0 {
                Endianness::Big
            } else {
                Endianness::Little
            };

            let mut parser = Parser::new(header)
                .with_endian(endian)
                .with_ptr_size(ptr_size);
            parser.seek(16)?;
            let version_ptr = parser.read_ptr()?;
            let modinfo_ptr = parser.read_ptr()?;

            let version = self
                .read_string_header(version_ptr, endian, ptr_size)
                .map_err(|e| BuildInfoTruncated(format!("version string: {}", e)))?;
            self.info.go_version = String::from_utf8_lossy(version).into_owned();

            let modinfo = self
                .read_string_header(modinfo_ptr, endian, ptr_size)
                .map_err(|e| BuildInfoTruncated(format!("module info: {}", e)))?;
            (self.info.go_version.clone(), modinfo.to_vec())
        };

        let (modinfo, truncated) = strip_sentinels(&raw_modinfo);
        let text = String::from_utf8_lossy(modinfo);
        ModInfoParser::new(&mut self.info).parse(&text)?;

        if truncated {
            return Err(BuildInfoTruncated(format!(
                "module info of {} has no end marker",
                version
            )));
        }

        Ok(())
    }

    /// Consumes the reader and returns what was decoded.
    #[must_use]
    pub fn into_inner(self) -> BuildInfo {
        self.info
    }

    /// Finds the VA of the header, searching the dedicated sections before writable data.
    fn locate(&self) -> Option<u64> {
        let dedicated = BUILDINFO_SECTIONS
            .iter()
            .filter_map(|name| self.file.section_by_name(name));
        let writable = self.file.sections().iter().filter(|section| {
            section.is_writable()
                && section.is_file_backed()
                && !BUILDINFO_SECTIONS.contains(&section.name.as_str())
        });

        dedicated
            .chain(writable)
            .find_map(|section| self.scan(section))
    }

    fn scan(&self, section: &Section) -> Option<u64> {
        let data = self.file.section_data(section).ok()?;
        let misalignment = section.address % HEADER_ALIGN;
        let mut position = ((HEADER_ALIGN - misalignment) % HEADER_ALIGN) as usize;

        while position + HEADER_SIZE <= data.len() {
            if data[position..].starts_with(BUILDINFO_MAGIC) {
                return Some(section.address + position as u64);
            }
            position += HEADER_ALIGN as usize;
        }

        None
    }

    fn read_string_header(&self, va: u64, endian: Endianness, ptr_size: usize) -> Result<&'a [u8]> {
        let mut parser = Parser::new(self.file.bytes_from(va)?)
            .with_endian(endian)
            .with_ptr_size(ptr_size);
        let data = parser.read_ptr()?;
        let len = parser.read_ptr()?;

        if len > MAX_STRING_LEN {
            return Err(malformed_error!("String length {} is implausible", len));
        }
        if len == 0 {
            return Ok(&[]);
        }

        self.file.slice_at(data, len as usize)
    }
}

fn read_inline<'a>(parser: &mut Parser<'a>) -> Result<&'a [u8]> {
    let len = parser.read_uvarint()?;
    let len = usize::try_from(len).map_err(|_| out_of_bounds_error!())?;
    parser.read_bytes(len)
}
