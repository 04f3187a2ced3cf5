//! Runtime layout versions and function table discovery.
//!
//! The internal tables of the Go runtime changed shape a handful of times. Every change that
//! matters for decoding is tied to a new function table magic, so the magic found at the start
//! of the pclntab fixes the [`LayoutVersion`] for the whole run. The version carries the layout
//! specific offsets used by the other decoders.
//!
//! | magic        | layout | Go releases |
//! |--------------|--------|-------------|
//! | `0xFFFFFFFB` | 1.2    | 1.2 - 1.15  |
//! | `0xFFFFFFFA` | 1.16   | 1.16 - 1.17 |
//! | `0xFFFFFFF0` | 1.18   | 1.18 - 1.19 |
//! | `0xFFFFFFF1` | 1.20   | 1.20 +      |
//!
//! Within the 1.2 layout, only Go 1.9 and later share a module data shape (1.9 inserted
//! `textsectmap` ahead of `typelinks`), which is why overrides naming an older release are
//! rejected.

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::{
    file::{container::Section, io::read_at, File},
    Error::UnknownVersion,
    Result,
};

/// Sections that hold the function table when the linker emits one.
const PCLNTAB_SECTIONS: [&str; 2] = [".gopclntab", "__gopclntab"];

/// Symbol marking the function table in binaries that keep a symbol table.
const PCLNTAB_SYMBOL: &str = "runtime.pclntab";

/// Word offsets (in pointer-sized units) of the [`crate::metadata::moduledata::ModuleData`]
/// fields this crate decodes. Slices occupy three words starting at the given offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleDataLayout {
    /// `ftab` slice
    pub ftab: usize,
    /// `filetab` slice
    pub filetab: usize,
    /// `minpc`, directly followed by `maxpc`
    pub minpc: usize,
    /// `text`, directly followed by `etext`
    pub text: usize,
    /// `types`, directly followed by `etypes`
    pub types: usize,
    /// `typelinks` slice
    pub typelinks: usize,
    /// `itablinks` slice
    pub itablinks: usize,
}

impl ModuleDataLayout {
    /// Number of pointer words that must be readable to decode every field.
    #[must_use]
    pub fn words(&self) -> usize {
        self.itablinks + 3
    }
}

/// The pclntab / moduledata revision of a Go release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum LayoutVersion {
    /// Go 1.2 - 1.15, module data as of Go 1.9
    #[strum(serialize = "1.2")]
    V1_2,
    /// Go 1.16 - 1.17
    #[strum(serialize = "1.16")]
    V1_16,
    /// Go 1.18 - 1.19
    #[strum(serialize = "1.18")]
    V1_18,
    /// Go 1.20 and later
    #[strum(serialize = "1.20")]
    V1_20,
}

impl LayoutVersion {
    /// The function table magic introduced with this layout.
    #[must_use]
    pub fn magic(self) -> u32 {
        match self {
            LayoutVersion::V1_2 => 0xFFFF_FFFB,
            LayoutVersion::V1_16 => 0xFFFF_FFFA,
            LayoutVersion::V1_18 => 0xFFFF_FFF0,
            LayoutVersion::V1_20 => 0xFFFF_FFF1,
        }
    }

    /// Maps a function table magic to its layout.
    #[must_use]
    pub fn from_magic(magic: u32) -> Option<LayoutVersion> {
        LayoutVersion::iter().find(|layout| layout.magic() == magic)
    }

    /// Maps a Go minor release number to its layout.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownVersion`] for releases before Go 1.9.
    pub fn from_minor(minor: u32) -> Result<LayoutVersion> {
        match minor {
            0..=8 => Err(UnknownVersion),
            9..=15 => Ok(LayoutVersion::V1_2),
            16..=17 => Ok(LayoutVersion::V1_16),
            18..=19 => Ok(LayoutVersion::V1_18),
            _ => Ok(LayoutVersion::V1_20),
        }
    }

    /// Resolves a version override such as `1.17`, `1.17.3` or `go1.21.4`.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownVersion`] if the string is not a Go 1.x release, or names a
    /// release before Go 1.9.
    pub fn from_version_str(version: &str) -> Result<LayoutVersion> {
        let minor = go_minor(version).ok_or(UnknownVersion)?;
        LayoutVersion::from_minor(minor)
    }

    /// Offset of the function table entries from the start of the pclntab, for layouts where
    /// it is fixed.
    #[must_use]
    pub fn fixed_functab_offset(self, ptr_size: usize) -> Option<usize> {
        match self {
            LayoutVersion::V1_2 => Some(8 + ptr_size),
            _ => None,
        }
    }

    /// Size of one function table entry.
    #[must_use]
    pub fn functab_entry_size(self, ptr_size: usize) -> usize {
        match self {
            LayoutVersion::V1_2 | LayoutVersion::V1_16 => 2 * ptr_size,
            LayoutVersion::V1_18 | LayoutVersion::V1_20 => 8,
        }
    }

    /// Offset of `nameoff` within a `_func` record.
    #[must_use]
    pub fn func_nameoff_offset(self, ptr_size: usize) -> usize {
        match self {
            LayoutVersion::V1_2 | LayoutVersion::V1_16 => ptr_size,
            LayoutVersion::V1_18 | LayoutVersion::V1_20 => 4,
        }
    }

    /// Word offsets of the module data fields.
    #[must_use]
    pub fn moduledata(self) -> ModuleDataLayout {
        match self {
            LayoutVersion::V1_2 => ModuleDataLayout {
                ftab: 3,
                filetab: 6,
                minpc: 10,
                text: 12,
                types: 25,
                typelinks: 30,
                itablinks: 33,
            },
            LayoutVersion::V1_16 => ModuleDataLayout {
                ftab: 16,
                filetab: 7,
                minpc: 20,
                text: 22,
                types: 35,
                typelinks: 40,
                itablinks: 43,
            },
            LayoutVersion::V1_18 => ModuleDataLayout {
                ftab: 16,
                filetab: 7,
                minpc: 20,
                text: 22,
                types: 35,
                typelinks: 42,
                itablinks: 45,
            },
            LayoutVersion::V1_20 => ModuleDataLayout {
                ftab: 16,
                filetab: 7,
                minpc: 20,
                text: 22,
                types: 37,
                typelinks: 44,
                itablinks: 47,
            },
        }
    }

    /// Element size of the module data `filetab` slice.
    #[must_use]
    pub fn filetab_element_size(self) -> usize {
        match self {
            LayoutVersion::V1_2 => 4,
            _ => 1,
        }
    }
}

/// Extracts the minor release from a Go version string (`go1.21.4` → 21).
///
/// Pre-release suffixes such as `rc1` or `beta2` are ignored.
#[must_use]
pub fn go_minor(version: &str) -> Option<u32> {
    let version = version.trim();
    let version = version.strip_prefix("go").unwrap_or(version);

    let mut parts = version.split('.');
    if parts.next()? != "1" {
        return None;
    }

    let minor = parts.next()?;
    let digits: String = minor.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// How the function table was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PclnTabSource {
    /// A dedicated section
    Section,
    /// The `runtime.pclntab` symbol
    Symbol,
    /// A signature scan over file-backed sections
    Scan,
}

/// The resolved function table location and layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PclnTabLocation {
    /// Virtual address of the table header
    pub va: u64,
    /// Layout the table is decoded with
    pub layout: LayoutVersion,
    /// How the table was found
    pub source: PclnTabSource,
}

/// Checks the fixed part of a function table header, returning the layout its magic names.
///
/// The header must carry a known magic, two zero pad bytes, an instruction quantum of 1, 2 or 4
/// and a pointer size of 4 or 8. When `require_functions` is set the function count must be
/// non-zero.
fn check_header(file: &File, data: &[u8], require_functions: bool) -> Option<LayoutVersion> {
    if data.len() < 8 {
        return None;
    }

    let mut offset = 0;
    let magic = read_at::<u32>(data, &mut offset, file.endianness()).ok()?;
    let layout = LayoutVersion::from_magic(magic)?;

    if data[4] != 0 || data[5] != 0 {
        return None;
    }
    if !matches!(data[6], 1 | 2 | 4) {
        return None;
    }
    let ptr_size = usize::from(data[7]);
    if ptr_size != 4 && ptr_size != 8 {
        return None;
    }

    if require_functions {
        let mut offset = 8;
        let nfunc = crate::file::io::read_ptr_at(data, &mut offset, ptr_size, file.endianness())
            .ok()?;
        if nfunc == 0 {
            return None;
        }
    }

    Some(layout)
}

/// Scans a single section for a function table header at 4-byte alignment.
fn scan_section(file: &File, section: &Section) -> Option<(u64, LayoutVersion)> {
    let data = file.section_data(section).ok()?;
    let misalignment = (section.address % 4) as usize;
    let mut position = (4 - misalignment) % 4;

    while position + 8 <= data.len() {
        let window = &data[position..position + 4];
        if window[0] == 0xFF || window[3] == 0xFF {
            if let Some(layout) = check_header(file, &data[position..], true) {
                return Some((section.address + position as u64, layout));
            }
        }
        position += 4;
    }

    None
}

/// Finds the function table and fixes the layout version.
///
/// Candidates are tried in order: the dedicated section, the `runtime.pclntab` symbol, then a
/// scan of every file-backed section. Without an override the first candidate with a known magic
/// wins and its magic fixes the layout. With an override the layout is taken from the override
/// and the first candidate that is readable is used.
///
/// # Errors
/// Returns [`crate::Error::UnknownVersion`] if no candidate matches, or if the override is not
/// a supported Go release.
pub fn resolve(file: &File, version_override: Option<&str>) -> Result<PclnTabLocation> {
    let forced = match version_override {
        Some(version) => Some(LayoutVersion::from_version_str(version)?),
        None => None,
    };

    let accept = |va: u64, source: PclnTabSource, require_functions: bool| {
        let data = file.bytes_from(va).ok()?;
        match (check_header(file, data, require_functions), forced) {
            (Some(_), Some(layout)) => Some(PclnTabLocation { va, layout, source }),
            (Some(layout), None) => Some(PclnTabLocation { va, layout, source }),
            (None, Some(layout)) if source != PclnTabSource::Scan && data.len() >= 8 => {
                Some(PclnTabLocation { va, layout, source })
            }
            (None, _) => None,
        }
    };

    for name in PCLNTAB_SECTIONS {
        if let Some(section) = file.section_by_name(name) {
            if let Some(location) = accept(section.address, PclnTabSource::Section, false) {
                log::debug!("Function table in section {} at 0x{:x}", name, location.va);
                return Ok(location);
            }
        }
    }

    if let Some(va) = file.symbol(PCLNTAB_SYMBOL) {
        if let Some(location) = accept(va, PclnTabSource::Symbol, false) {
            log::debug!("Function table at symbol {} 0x{:x}", PCLNTAB_SYMBOL, va);
            return Ok(location);
        }
    }

    for section in file.sections().iter().filter(|s| s.is_file_backed()) {
        if let Some((va, layout)) = scan_section(file, section) {
            log::debug!(
                "Function table found by scan in {} at 0x{:x} (magic layout {})",
                section.name,
                va,
                layout
            );
            return Ok(PclnTabLocation {
                va,
                layout: forced.unwrap_or(layout),
                source: PclnTabSource::Scan,
            });
        }
    }

    Err(UnknownVersion)
}
