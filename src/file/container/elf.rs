use std::collections::HashMap;

use goblin::elf::{
    header::{EM_386, EM_AARCH64, EM_ARM, EM_MIPS, EM_PPC64, EM_RISCV, EM_S390, EM_X86_64},
    program_header::{PF_W, PF_X, PT_LOAD},
    section_header::{SHF_EXECINSTR, SHF_WRITE, SHT_NOBITS, SHT_NULL},
    Elf,
};

use super::{Container, ContainerKind, Section, SectionFlags};
use crate::{file::io::Endianness, Result};

/// `EM_LOONGARCH`, not exported by every goblin release.
const EM_LOONGARCH: u16 = 258;

/// Index of the OS/ABI byte within `e_ident`.
const EI_OSABI: usize = 7;

/// An ELF executable.
#[derive(Debug)]
pub struct ElfContainer {
    sections: Vec<Section>,
    symbols: HashMap<String, u64>,
    entry: u64,
    pointer_width: usize,
    endianness: Endianness,
    arch: &'static str,
    os: &'static str,
}

impl ElfContainer {
    /// Parses the ELF headers, section table and `.symtab` of `data`.
    ///
    /// An image without section headers is described by its `PT_LOAD` segments instead, one
    /// synthetic section (`LOAD0`, `LOAD1`, ...) per segment.
    ///
    /// # Errors
    /// Returns [`crate::Error::GoblinErr`] if goblin rejects the headers.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let elf = Elf::parse(data)?;

        let endianness = if elf.little_endian {
            Endianness::Little
        } else {
            Endianness::Big
        };

        let mut sections: Vec<Section> = elf
            .section_headers
            .iter()
            .filter(|header| header.sh_type != SHT_NULL)
            .map(|header| {
                let mut flags = SectionFlags::empty();
                if header.sh_flags & u64::from(SHF_EXECINSTR) != 0 {
                    flags |= SectionFlags::EXECUTABLE;
                }
                if header.sh_flags & u64::from(SHF_WRITE) != 0 {
                    flags |= SectionFlags::WRITABLE;
                }

                let file_size = if header.sh_type == SHT_NOBITS {
                    0
                } else {
                    flags |= SectionFlags::INITIALIZED;
                    header.sh_size
                };

                Section {
                    name: elf
                        .shdr_strtab
                        .get_at(header.sh_name)
                        .unwrap_or("")
                        .to_string(),
                    address: header.sh_addr,
                    size: header.sh_size,
                    offset: header.sh_offset,
                    file_size,
                    flags,
                }
            })
            .collect();

        if sections.is_empty() {
            sections = load_segments(&elf);
            log::debug!(
                "No section headers, using {} load segments",
                sections.len()
            );
        }

        let mut symbols = HashMap::new();
        for symbol in elf.syms.iter() {
            if symbol.st_value == 0 {
                continue;
            }
            let Some(name) = elf.strtab.get_at(symbol.st_name) else {
                continue;
            };
            if !name.is_empty() {
                symbols
                    .entry(name.to_string())
                    .or_insert(symbol.st_value);
            }
        }

        Ok(ElfContainer {
            sections,
            symbols,
            entry: elf.header.e_entry,
            pointer_width: if elf.is_64 { 8 } else { 4 },
            endianness,
            arch: goarch(elf.header.e_machine, elf.is_64, elf.little_endian),
            os: goos(elf.header.e_ident[EI_OSABI]),
        })
    }
}

fn load_segments(elf: &Elf) -> Vec<Section> {
    elf.program_headers
        .iter()
        .filter(|header| header.p_type == PT_LOAD)
        .enumerate()
        .map(|(index, header)| {
            let mut flags = SectionFlags::empty();
            if header.p_flags & PF_X != 0 {
                flags |= SectionFlags::EXECUTABLE;
            }
            if header.p_flags & PF_W != 0 {
                flags |= SectionFlags::WRITABLE;
            }
            if header.p_filesz > 0 {
                flags |= SectionFlags::INITIALIZED;
            }

            Section {
                name: format!("LOAD{}", index),
                address: header.p_vaddr,
                size: header.p_memsz,
                offset: header.p_offset,
                file_size: header.p_filesz.min(header.p_memsz),
                flags,
            }
        })
        .collect()
}

fn goarch(machine: u16, is_64: bool, little_endian: bool) -> &'static str {
    match machine {
        EM_386 => "386",
        EM_X86_64 => "amd64",
        EM_ARM => "arm",
        EM_AARCH64 => "arm64",
        EM_PPC64 if little_endian => "ppc64le",
        EM_PPC64 => "ppc64",
        EM_MIPS => match (is_64, little_endian) {
            (true, true) => "mips64le",
            (true, false) => "mips64",
            (false, true) => "mipsle",
            (false, false) => "mips",
        },
        EM_RISCV => "riscv64",
        EM_S390 => "s390x",
        EM_LOONGARCH => "loong64",
        _ => "unknown",
    }
}

fn goos(osabi: u8) -> &'static str {
    match osabi {
        2 => "netbsd",
        6 => "solaris",
        9 => "freebsd",
        12 => "openbsd",
        _ => "linux",
    }
}

impl Container for ElfContainer {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Elf
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
        self.os
    }

    fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }
}
