use std::collections::HashMap;

use goblin::mach::{
    constants::{S_ATTR_PURE_INSTRUCTIONS, S_ATTR_SOME_INSTRUCTIONS, S_ZEROFILL, SECTION_TYPE},
    cputype::{CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_X86, CPU_TYPE_X86_64},
    MachO,
};

use super::{Container, ContainerKind, Section, SectionFlags};
use crate::{file::io::Endianness, Result};

/// `VM_PROT_WRITE` segment protection bit.
const VM_PROT_WRITE: u32 = 0x2;
/// `VM_PROT_EXECUTE` segment protection bit.
const VM_PROT_EXECUTE: u32 = 0x4;
/// Zero-fill section types besides `S_ZEROFILL` (`S_GB_ZEROFILL`, `S_THREAD_LOCAL_ZEROFILL`).
const S_GB_ZEROFILL: u32 = 0x0C;
const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;

/// A thin Mach-O executable.
#[derive(Debug)]
pub struct MachOContainer {
    sections: Vec<Section>,
    symbols: HashMap<String, u64>,
    entry: u64,
    pointer_width: usize,
    endianness: Endianness,
    arch: &'static str,
}

impl MachOContainer {
    /// Parses the load commands, sections and symbol table of `data`.
    ///
    /// Symbol names have the leading underscore of the C name mangling stripped.
    ///
    /// # Errors
    /// Returns [`crate::Error::GoblinErr`] if goblin rejects the headers.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let macho = MachO::parse(data, 0)?;

        let mut sections = Vec::new();
        for segment in macho.segments.iter() {
            let segment_name = segment.name().unwrap_or("");

            let segment_sections = match segment.sections() {
                Ok(segment_sections) => segment_sections,
                Err(error) => {
                    log::debug!("Skipping sections of segment {}: {}", segment_name, error);
                    continue;
                }
            };

            for (section, _) in segment_sections {
                let mut flags = SectionFlags::empty();
                if segment.initprot & VM_PROT_WRITE != 0 {
                    flags |= SectionFlags::WRITABLE;
                }
                if segment.initprot & VM_PROT_EXECUTE != 0
                    && section.flags & (S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS) != 0
                {
                    flags |= SectionFlags::EXECUTABLE;
                }

                let section_type = section.flags & SECTION_TYPE;
                let zero_fill = matches!(
                    section_type,
                    S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
                );
                let file_size = if zero_fill || section.offset == 0 {
                    0
                } else {
                    flags |= SectionFlags::INITIALIZED;
                    section.size
                };

                sections.push(Section {
                    name: section.name().unwrap_or("").to_string(),
                    address: section.addr,
                    size: section.size,
                    offset: u64::from(section.offset),
                    file_size,
                    flags,
                });
            }
        }

        let mut symbols = HashMap::new();
        for symbol in macho.symbols() {
            let Ok((name, nlist)) = symbol else {
                continue;
            };
            if nlist.n_value == 0 {
                continue;
            }
            let name = name.strip_prefix('_').unwrap_or(name);
            if !name.is_empty() {
                symbols.entry(name.to_string()).or_insert(nlist.n_value);
            }
        }

        // goblin maps an LC_MAIN offset through __TEXT already
        Ok(MachOContainer {
            sections,
            symbols,
            entry: macho.entry,
            pointer_width: if macho.is_64 { 8 } else { 4 },
            endianness: if macho.little_endian {
                Endianness::Little
            } else {
                Endianness::Big
            },
            arch: goarch(macho.header.cputype()),
        })
    }
}

fn goarch(cputype: u32) -> &'static str {
    match cputype {
        CPU_TYPE_X86 => "386",
        CPU_TYPE_X86_64 => "amd64",
        CPU_TYPE_ARM => "arm",
        CPU_TYPE_ARM64 => "arm64",
        _ => "unknown",
    }
}

impl Container for MachOContainer {
    fn kind(&self) -> ContainerKind {
        ContainerKind::MachO
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
        self.endianness
    }

    fn arch(&self) -> &str {
        self.arch
    }

    fn os(&self) -> &str {
        "darwin"
    }

    fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }
}
