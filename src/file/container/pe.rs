use std::collections::HashMap;

use goblin::pe::{
    header::{COFF_MACHINE_ARM, COFF_MACHINE_ARM64, COFF_MACHINE_X86, COFF_MACHINE_X86_64},
    section_table::{IMAGE_SCN_CNT_UNINITIALIZED_DATA, IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_WRITE},
    PE,
};

use super::{Container, ContainerKind, Section, SectionFlags};
use crate::{
    file::{io::Endianness, parser::Parser},
    Result,
};

/// Size of one COFF symbol table record.
const COFF_SYMBOL_SIZE: usize = 18;

/// A PE executable.
///
/// Go does not emit `.gopclntab`-style sections for PE; the runtime tables are located through
/// the COFF symbol table the Go linker keeps unless the binary was built with `-s`.
#[derive(Debug)]
pub struct PeContainer {
    sections: Vec<Section>,
    symbols: HashMap<String, u64>,
    entry: u64,
    pointer_width: usize,
    arch: &'static str,
}

impl PeContainer {
    /// Parses the PE headers, section table and COFF symbol table of `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::GoblinErr`] if goblin rejects the headers.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let pe = PE::parse(data)?;
        let image_base = pe.image_base as u64;

        let sections: Vec<Section> = pe
            .sections
            .iter()
            .map(|table| {
                let mut flags = SectionFlags::empty();
                if table.characteristics & IMAGE_SCN_MEM_EXECUTE != 0 {
                    flags |= SectionFlags::EXECUTABLE;
                }
                if table.characteristics & IMAGE_SCN_MEM_WRITE != 0 {
                    flags |= SectionFlags::WRITABLE;
                }

                let size = if table.virtual_size == 0 {
                    u64::from(table.size_of_raw_data)
                } else {
                    u64::from(table.virtual_size)
                };
                let file_size = if table.characteristics & IMAGE_SCN_CNT_UNINITIALIZED_DATA != 0 {
                    0
                } else {
                    u64::from(table.size_of_raw_data).min(size)
                };
                if file_size > 0 {
                    flags |= SectionFlags::INITIALIZED;
                }

                let name = match &table.real_name {
                    Some(real_name) => real_name.clone(),
                    None => table.name().unwrap_or("").to_string(),
                };

                Section {
                    name,
                    address: image_base + u64::from(table.virtual_address),
                    size,
                    offset: u64::from(table.pointer_to_raw_data),
                    file_size,
                    flags,
                }
            })
            .collect();

        let coff = &pe.header.coff_header;
        let symbols = coff_symbols(
            data,
            coff.pointer_to_symbol_table as usize,
            coff.number_of_symbol_table as usize,
            &sections,
        );

        let entry = pe.entry as u64;
        Ok(PeContainer {
            sections,
            symbols,
            entry: if entry == 0 { 0 } else { image_base + entry },
            pointer_width: if pe.is_64 { 8 } else { 4 },
            arch: goarch(coff.machine),
        })
    }
}

fn goarch(machine: u16) -> &'static str {
    match machine {
        COFF_MACHINE_X86 => "386",
        COFF_MACHINE_X86_64 => "amd64",
        COFF_MACHINE_ARM | 0x01C4 => "arm",
        COFF_MACHINE_ARM64 => "arm64",
        _ => "unknown",
    }
}

/// Reads the COFF symbol table into a name to VA map.
///
/// Damaged tables are cut off at the first unreadable record; the symbols read up to that point
/// are kept.
fn coff_symbols(
    data: &[u8],
    table_offset: usize,
    count: usize,
    sections: &[Section],
) -> HashMap<String, u64> {
    let mut symbols = HashMap::new();
    if table_offset == 0 || count == 0 {
        return symbols;
    }

    let Some(strings_offset) = count
        .checked_mul(COFF_SYMBOL_SIZE)
        .and_then(|size| size.checked_add(table_offset))
    else {
        return symbols;
    };
    let strings = data.get(strings_offset..).unwrap_or(&[]);

    let mut index = 0;
    while index < count {
        let Some(record) = index
            .checked_mul(COFF_SYMBOL_SIZE)
            .and_then(|start| data.get(table_offset + start..table_offset + start + COFF_SYMBOL_SIZE))
        else {
            break;
        };

        let Ok((name, value, section_number, aux_count)) = read_coff_symbol(record, strings) else {
            break;
        };
        index += 1 + aux_count;

        if section_number <= 0 || name.is_empty() {
            continue;
        }
        let Some(section) = sections.get(section_number as usize - 1) else {
            continue;
        };

        symbols
            .entry(name)
            .or_insert(section.address + u64::from(value));
    }

    symbols
}

fn read_coff_symbol(record: &[u8], strings: &[u8]) -> Result<(String, u32, i16, usize)> {
    let mut parser = Parser::new(record);

    let short_name = parser.read_bytes(8)?;
    let name = if short_name[..4] == [0, 0, 0, 0] {
        let mut name_parser = Parser::new(&short_name[4..]);
        let string_offset = name_parser.read_le::<u32>()? as usize;
        let mut string_parser = Parser::new(strings);
        string_parser.seek(string_offset)?;
        string_parser.read_string_utf8()?
    } else {
        let end = short_name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&short_name[..end]).into_owned()
    };

    let value = parser.read_le::<u32>()?;
    let section_number = parser.read_le::<i16>()?;
    let _symbol_type = parser.read_le::<u16>()?;
    let _storage_class = parser.read_le::<u8>()?;
    let aux_count = parser.read_le::<u8>()?;

    Ok((name, value, section_number, usize::from(aux_count)))
}

impl Container for PeContainer {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Pe
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn entry_point(&self) -> u64 {
        self.entry
    }

    fn pointer_width(&self) -> usize {
        self.pointer_width
    }

    fn endianness(&self) -> Endianness {
        Endianness::Little
    }

    fn arch(&self) -> &str {
        self.arch
    }

    fn os(&self) -> &str {
        "windows"
    }

    fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }
}
