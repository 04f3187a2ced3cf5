//! Runtime module data discovery.
//!
//! `runtime.firstmoduledata` is the root record of a Go binary's runtime metadata. Among many
//! other things it points at the function table, the type section (`types`..`etypes`) and the
//! `typelinks` / `itablinks` tables used to enumerate type descriptors.
//!
//! Unstripped binaries name the record in their symbol table. Stripped ones are searched
//! heuristically: the first word of every layout is a pointer back to the function table, so
//! each pointer-aligned slot holding the function table VA is a candidate, and a candidate is
//! accepted once its slices agree with the function table header.

use serde::Serialize;
use strum::Display;

use crate::{
    file::{
        container::Section,
        io::{read_at, read_ptr_at},
        File,
    },
    metadata::{pclntab::PclnHeader, version::LayoutVersion},
    Error::ModuleDataNotFound,
    Result,
};

/// Symbol naming the root module record.
pub const MODULEDATA_SYMBOL: &str = "runtime.firstmoduledata";

/// Data sections searched before any other writable section.
const PREFERRED_SECTIONS: [&str; 4] = [".noptrdata", "__noptrdata", ".data", "__data"];

/// Number of leading `typelinks` entries checked against the type section.
const TYPELINKS_SAMPLE: u64 = 16;

/// A Go slice header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GoSlice {
    /// Address of the first element
    pub data: u64,
    /// Number of elements
    pub len: u64,
    /// Capacity in elements
    #[serde(rename = "Capacity")]
    pub cap: u64,
}

/// How the module data record was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LocateMethod {
    /// Via the `runtime.firstmoduledata` symbol
    Symbol,
    /// Via the heuristic scan of data sections
    Scan,
}

/// The decoded fields of `runtime.moduledata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleData {
    /// Address of the record
    pub va: u64,
    /// Layout the record was decoded with
    pub layout: LayoutVersion,
    /// First word: the function table address
    pub pclntab: u64,
    /// Function table entries
    pub ftab: GoSlice,
    /// File name table
    pub filetab: GoSlice,
    /// Lowest PC covered by the function table
    pub minpc: u64,
    /// Highest PC covered by the function table
    pub maxpc: u64,
    /// Start of the text section
    pub text: u64,
    /// End of the text section
    pub etext: u64,
    /// Start of the type descriptor section
    pub types: u64,
    /// End of the type descriptor section
    pub etypes: u64,
    /// `int32` offsets of type descriptors, relative to `types`
    pub typelinks: GoSlice,
    /// Pointers to itabs
    pub itablinks: GoSlice,
}

impl ModuleData {
    /// Decodes the record at `va`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the record is not entirely mapped.
    pub fn read(file: &File, va: u64, layout: LayoutVersion) -> Result<Self> {
        let offsets = layout.moduledata();
        let ptr_size = file.pointer_width();
        let data = file.slice_at(va, offsets.words() * ptr_size)?;

        let word = |index: usize| -> Result<u64> {
            let mut offset = index * ptr_size;
            read_ptr_at(data, &mut offset, ptr_size, file.endianness())
        };
        let slice = |index: usize| -> Result<GoSlice> {
            Ok(GoSlice {
                data: word(index)?,
                len: word(index + 1)?,
                cap: word(index + 2)?,
            })
        };

        Ok(ModuleData {
            va,
            layout,
            pclntab: word(0)?,
            ftab: slice(offsets.ftab)?,
            filetab: slice(offsets.filetab)?,
            minpc: word(offsets.minpc)?,
            maxpc: word(offsets.minpc + 1)?,
            text: word(offsets.text)?,
            etext: word(offsets.text + 1)?,
            types: word(offsets.types)?,
            etypes: word(offsets.types + 1)?,
            typelinks: slice(offsets.typelinks)?,
            itablinks: slice(offsets.itablinks)?,
        })
    }

    /// Checks the record against the function table header and the file.
    ///
    /// Returns the name of the first failed check.
    pub fn validate(&self, file: &File, header: &PclnHeader) -> std::result::Result<(), &'static str> {
        let file_len = file.len() as u64;
        let ptr_size = file.pointer_width() as u64;

        if self.pclntab != header.va {
            return Err("pclntab pointer");
        }
        if self.ftab.len == 0 || self.ftab.len > self.ftab.cap {
            return Err("ftab bounds");
        }
        if Some(self.ftab.len) != header.nfunc.checked_add(1) {
            return Err("ftab length");
        }
        if self.ftab.data != header.functab_va() {
            return Err("ftab address");
        }
        if self.text > self.etext {
            return Err("text range");
        }
        if self.minpc > self.maxpc {
            return Err("pc range");
        }
        if self.types >= self.etypes {
            return Err("types range");
        }

        let slices = [
            (self.typelinks, 4, "typelinks"),
            (self.itablinks, ptr_size, "itablinks"),
            (self.filetab, self.layout.filetab_element_size() as u64, "filetab"),
        ];
        for (slice, element_size, name) in slices {
            if slice.len > slice.cap {
                return Err(name);
            }
            match slice.len.checked_mul(element_size) {
                Some(bytes) if bytes <= file_len => {}
                _ => return Err(name),
            }
        }

        if !self.typelinks_within_types(file) {
            return Err("typelinks offsets");
        }

        Ok(())
    }

    /// Checks that the leading `typelinks` offsets land inside `types..etypes`.
    ///
    /// A record read with the wrong word offsets (a Go 1.8 binary has no `textsectmap`) takes
    /// its itab pointers for type offsets, which fails here. Unmapped tables are left to the
    /// type stage.
    fn typelinks_within_types(&self, file: &File) -> bool {
        let count = self.typelinks.len.min(TYPELINKS_SAMPLE) as usize;
        let Ok(data) = file.slice_at(self.typelinks.data, count * 4) else {
            return true;
        };

        let span = self.etypes.saturating_sub(self.types);
        data.chunks_exact(4).all(|chunk| {
            let mut offset = 0;
            read_at::<i32>(chunk, &mut offset, file.endianness())
                .is_ok_and(|link| link >= 0 && (link as u64) < span)
        })
    }

    /// Reads and validates the record named by the `runtime.firstmoduledata` symbol.
    ///
    /// # Errors
    /// Returns [`crate::Error::ModuleDataNotFound`] if the symbol is missing or its record does
    /// not validate.
    pub fn from_symbol(file: &File, header: &PclnHeader) -> Result<Self> {
        let va = file
            .symbol(MODULEDATA_SYMBOL)
            .ok_or(ModuleDataNotFound)?;

        let moduledata = Self::read(file, va, header.layout)?;
        match moduledata.validate(file, header) {
            Ok(()) => Ok(moduledata),
            Err(check) => {
                log::debug!(
                    "Module data symbol at 0x{:x} failed validation: {}",
                    va,
                    check
                );
                Err(ModuleDataNotFound)
            }
        }
    }

    /// Searches data sections for a record pointing back at the function table.
    ///
    /// # Errors
    /// Returns [`crate::Error::ModuleDataNotFound`] if no candidate validates.
    pub fn scan(file: &File, header: &PclnHeader) -> Result<Self> {
        let preferred = PREFERRED_SECTIONS
            .iter()
            .filter_map(|name| file.section_by_name(name));
        let remaining = file.sections().iter().filter(|section| {
            section.is_writable()
                && section.is_file_backed()
                && !PREFERRED_SECTIONS.contains(&section.name.as_str())
        });

        for section in preferred.chain(remaining) {
            if let Some(moduledata) = Self::scan_section(file, section, header) {
                return Ok(moduledata);
            }
        }

        Err(ModuleDataNotFound)
    }

    fn scan_section(file: &File, section: &Section, header: &PclnHeader) -> Option<Self> {
        let data = file.section_data(section).ok()?;
        let ptr_size = file.pointer_width();
        let misalignment = (section.address % ptr_size as u64) as usize;
        let mut position = (ptr_size - misalignment) % ptr_size;

        while position + ptr_size <= data.len() {
            let mut offset = position;
            let value = read_ptr_at(data, &mut offset, ptr_size, file.endianness()).ok()?;

            if value == header.va {
                let va = section.address + position as u64;
                match Self::read(file, va, header.layout) {
                    Ok(moduledata) => match moduledata.validate(file, header) {
                        Ok(()) => {
                            log::debug!("Module data found by scan at 0x{:x}", va);
                            return Some(moduledata);
                        }
                        Err(check) => {
                            log::debug!("Candidate 0x{:x} rejected: {}", va, check);
                        }
                    },
                    Err(error) => log::debug!("Candidate 0x{:x} unreadable: {}", va, error),
                }
            }

            position += ptr_size;
        }

        None
    }

    /// Finds the record, preferring the symbol and falling back to the scan.
    ///
    /// # Errors
    /// Returns [`crate::Error::ModuleDataNotFound`] if neither method yields a valid record.
    pub fn locate(file: &File, header: &PclnHeader) -> Result<(Self, LocateMethod)> {
        match Self::from_symbol(file, header) {
            Ok(moduledata) => return Ok((moduledata, LocateMethod::Symbol)),
            Err(error) => log::debug!("Module data symbol unusable ({}), scanning", error),
        }

        Self::scan(file, header).map(|moduledata| (moduledata, LocateMethod::Scan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::pclntab::FunctionTable,
        metadata::version::{PclnTabLocation, PclnTabSource},
        test::{ElfBuilder, SectionSpec},
        Error,
    };

    const PCLNTAB_VA: u64 = 0x50_0000;
    const DATA_VA: u64 = 0x60_0000;
    const TYPES_VA: u64 = 0x48_0000;

    /// Minimal 1.20 table: 2 functions, functab at offset 72.
    fn pclntab() -> Vec<u8> {
        let mut t = Vec::new();
        t.extend(0xFFFF_FFF1u32.to_le_bytes());
        t.extend([0u8, 0, 1, 8]);
        t.extend(2u64.to_le_bytes());
        t.extend(0u64.to_le_bytes());
        t.extend(0x40_1000u64.to_le_bytes());
        for offset in [0u64, 0, 0, 0, 72] {
            t.extend(offset.to_le_bytes());
        }
        t.resize(72 + 3 * 8, 0);
        t
    }

    fn moduledata(layout: LayoutVersion, pclntab: u64, ftab_len: u64) -> Vec<u8> {
        let offsets = layout.moduledata();
        let mut words = vec![0u64; 50];
        words[0] = pclntab;
        let ftab = [PCLNTAB_VA + 72, ftab_len, ftab_len];
        words[offsets.ftab..offsets.ftab + 3].copy_from_slice(&ftab);
        words[offsets.filetab..offsets.filetab + 3].copy_from_slice(&[PCLNTAB_VA + 8, 1, 1]);
        words[offsets.minpc] = 0x40_1000;
        words[offsets.minpc + 1] = 0x40_1800;
        words[offsets.text] = 0x40_1000;
        words[offsets.text + 1] = 0x40_2000;
        words[offsets.types] = TYPES_VA;
        words[offsets.types + 1] = TYPES_VA + 0x100;
        words[offsets.typelinks..offsets.typelinks + 3].copy_from_slice(&[TYPES_VA, 2, 2]);
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn image(with_symbol: bool, decoy_first: bool) -> File {
        let mut data = Vec::new();
        if decoy_first {
            // Points at the table but carries a wrong ftab length.
            data.extend(moduledata(LayoutVersion::V1_20, PCLNTAB_VA, 7));
        }
        let record_va = DATA_VA + data.len() as u64;
        data.extend(moduledata(LayoutVersion::V1_20, PCLNTAB_VA, 3));

        let mut builder = ElfBuilder::new();
        builder.section(SectionSpec::code(".text", 0x40_1000, vec![0xCC; 0x1000]));
        builder.section(SectionSpec::rodata(".typelink", TYPES_VA, vec![0u8; 0x100]));
        builder.section(SectionSpec::rodata(".gopclntab", PCLNTAB_VA, pclntab()));
        builder.section(SectionSpec::data(".noptrdata", DATA_VA, data));
        if with_symbol {
            builder.symbol(MODULEDATA_SYMBOL, record_va);
        }
        File::from_mem(builder.build()).unwrap()
    }

    fn header(file: &File) -> PclnHeader {
        let location = PclnTabLocation {
            va: PCLNTAB_VA,
            layout: LayoutVersion::V1_20,
            source: PclnTabSource::Section,
        };
        *FunctionTable::new(file, &location).unwrap().header()
    }

    #[test]
    fn symbol_and_scan_agree() {
        let file = image(true, true);
        let header = header(&file);

        let by_symbol = ModuleData::from_symbol(&file, &header).unwrap();
        let by_scan = ModuleData::scan(&file, &header).unwrap();

        assert_eq!(by_symbol.va, by_scan.va);
        assert_eq!(by_symbol, by_scan);
        assert_eq!(by_scan.va, DATA_VA + 50 * 8);
        assert_eq!(by_scan.types, TYPES_VA);
        assert_eq!(by_scan.typelinks.len, 2);
    }

    #[test]
    fn locate_falls_back_to_scan() {
        let file = image(false, false);
        let header = header(&file);

        let (moduledata, method) = ModuleData::locate(&file, &header).unwrap();
        assert_eq!(method, LocateMethod::Scan);
        assert_eq!(moduledata.va, DATA_VA);

        let file = image(true, false);
        let (_, method) = ModuleData::locate(&file, &header).unwrap();
        assert_eq!(method, LocateMethod::Symbol);
    }

    #[test]
    fn validation_checks() {
        let file = image(false, false);
        let header = header(&file);
        let valid = ModuleData::read(&file, DATA_VA, LayoutVersion::V1_20).unwrap();
        assert_eq!(valid.validate(&file, &header), Ok(()));

        let mut broken = valid;
        broken.ftab.data += 8;
        assert_eq!(broken.validate(&file, &header), Err("ftab address"));

        let mut broken = valid;
        broken.etypes = broken.types;
        assert_eq!(broken.validate(&file, &header), Err("types range"));

        let mut broken = valid;
        broken.typelinks.len = broken.typelinks.cap + 1;
        assert_eq!(broken.validate(&file, &header), Err("typelinks"));

        // Pointers where offsets belong, as in a Go 1.8 record
        let mut broken = valid;
        broken.typelinks.data = DATA_VA;
        assert_eq!(broken.validate(&file, &header), Err("typelinks offsets"));

        let mut broken = valid;
        broken.itablinks = GoSlice {
            data: 0,
            len: u64::MAX / 4,
            cap: u64::MAX / 4,
        };
        assert_eq!(broken.validate(&file, &header), Err("itablinks"));
    }

    #[test]
    fn older_layouts() {
        for layout in [LayoutVersion::V1_2, LayoutVersion::V1_16, LayoutVersion::V1_18] {
            let mut builder = ElfBuilder::new();
            builder
                .section(SectionSpec::rodata(".typelink", TYPES_VA, vec![0u8; 0x100]))
                .section(SectionSpec::rodata(".gopclntab", PCLNTAB_VA, pclntab()))
                .section(SectionSpec::data(
                    ".noptrdata",
                    DATA_VA,
                    moduledata(layout, PCLNTAB_VA, 3),
                ));
            let file = File::from_mem(builder.build()).unwrap();
            let header = header(&file);

            let record = ModuleData::read(&file, DATA_VA, layout).unwrap();
            assert_eq!(record.layout, layout);
            assert_eq!(
                record.ftab,
                GoSlice {
                    data: PCLNTAB_VA + 72,
                    len: 3,
                    cap: 3
                }
            );
            assert_eq!(record.filetab.data, PCLNTAB_VA + 8);
            assert_eq!((record.minpc, record.maxpc), (0x40_1000, 0x40_1800));
            assert_eq!((record.text, record.etext), (0x40_1000, 0x40_2000));
            assert_eq!((record.types, record.etypes), (TYPES_VA, TYPES_VA + 0x100));
            assert_eq!(record.typelinks.data, TYPES_VA);
            assert_eq!(record.typelinks.len, 2);
            assert_eq!(record.validate(&file, &header), Ok(()), "{}", layout);

            // The same bytes read with the 1.20 offsets do not validate
            let misread = ModuleData::read(&file, DATA_VA, LayoutVersion::V1_20).unwrap();
            assert!(misread.validate(&file, &header).is_err(), "{}", layout);
        }
    }

    #[test]
    fn not_found() {
        let mut builder = ElfBuilder::new();
        builder.section(SectionSpec::rodata(".gopclntab", PCLNTAB_VA, pclntab()));
        builder.section(SectionSpec::data(".noptrdata", DATA_VA, vec![0u8; 0x400]));
        let file = File::from_mem(builder.build()).unwrap();
        let header = header(&file);

        assert!(matches!(
            ModuleData::locate(&file, &header),
            Err(Error::ModuleDataNotFound)
        ));
    }
}
