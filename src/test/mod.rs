//! Shared fixtures for unit tests.
//!
//! [`ElfBuilder`] writes minimal ELF64 executables with arbitrary sections and a symbol table.
//! Images carry either section headers only, or `PT_LOAD` program headers only.

/// Section header type `SHT_PROGBITS`.
const SHT_PROGBITS: u32 = 1;
/// Section header type `SHT_SYMTAB`.
const SHT_SYMTAB: u32 = 2;
/// Section header type `SHT_STRTAB`.
const SHT_STRTAB: u32 = 3;
/// Section header type `SHT_NOBITS`.
const SHT_NOBITS: u32 = 8;

const SHF_WRITE: u64 = 0x1;
const SHF_ALLOC: u64 = 0x2;
const SHF_EXECINSTR: u64 = 0x4;

/// Program header type `PT_LOAD`.
const PT_LOAD: u32 = 1;
const PF_X: u32 = 0x1;
const PF_W: u32 = 0x2;
const PF_R: u32 = 0x4;

/// One section of a synthetic image.
pub struct SectionSpec {
    pub name: String,
    pub address: u64,
    pub flags: u64,
    pub kind: u32,
    pub data: Vec<u8>,
    /// In-memory size for `SHT_NOBITS` sections
    pub size: u64,
}

impl SectionSpec {
    pub fn code(name: &str, address: u64, data: Vec<u8>) -> Self {
        Self::progbits(name, address, SHF_ALLOC | SHF_EXECINSTR, data)
    }

    pub fn rodata(name: &str, address: u64, data: Vec<u8>) -> Self {
        Self::progbits(name, address, SHF_ALLOC, data)
    }

    pub fn data(name: &str, address: u64, data: Vec<u8>) -> Self {
        Self::progbits(name, address, SHF_ALLOC | SHF_WRITE, data)
    }

    pub fn bss(name: &str, address: u64, size: u64) -> Self {
        SectionSpec {
            name: name.to_string(),
            address,
            flags: SHF_ALLOC | SHF_WRITE,
            kind: SHT_NOBITS,
            data: Vec::new(),
            size,
        }
    }

    fn progbits(name: &str, address: u64, flags: u64, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        SectionSpec {
            name: name.to_string(),
            address,
            flags,
            kind: SHT_PROGBITS,
            data,
            size,
        }
    }
}

/// Writer for minimal ELF64 executables.
#[derive(Default)]
pub struct ElfBuilder {
    sections: Vec<SectionSpec>,
    symbols: Vec<(String, u64)>,
    entry: u64,
    big_endian: bool,
    segments_only: bool,
}

struct Header {
    name: u32,
    kind: u32,
    flags: u64,
    address: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    align: u64,
    entsize: u64,
}

/// Appends integers in the byte order of the image.
struct Encoder {
    big_endian: bool,
}

impl Encoder {
    fn u16(&self, out: &mut Vec<u8>, value: u16) {
        if self.big_endian {
            out.extend(value.to_be_bytes());
        } else {
            out.extend(value.to_le_bytes());
        }
    }

    fn u32(&self, out: &mut Vec<u8>, value: u32) {
        if self.big_endian {
            out.extend(value.to_be_bytes());
        } else {
            out.extend(value.to_le_bytes());
        }
    }

    fn u64(&self, out: &mut Vec<u8>, value: u64) {
        if self.big_endian {
            out.extend(value.to_be_bytes());
        } else {
            out.extend(value.to_le_bytes());
        }
    }
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&mut self, section: SectionSpec) -> &mut Self {
        self.sections.push(section);
        self
    }

    pub fn symbol(&mut self, name: &str, value: u64) -> &mut Self {
        self.symbols.push((name.to_string(), value));
        self
    }

    pub fn entry(&mut self, entry: u64) -> &mut Self {
        self.entry = entry;
        self
    }

    /// Writes headers big-endian. Section data is taken as given.
    pub fn big_endian(&mut self) -> &mut Self {
        self.big_endian = true;
        self
    }

    /// Describes every section as a `PT_LOAD` segment and writes no section headers or
    /// symbols, like an image run through `sstrip`.
    pub fn segments_only(&mut self) -> &mut Self {
        self.segments_only = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        if self.segments_only {
            self.build_segments()
        } else {
            self.build_sections()
        }
    }

    fn build_sections(&self) -> Vec<u8> {
        let enc = Encoder {
            big_endian: self.big_endian,
        };
        let mut out = vec![0u8; 64];
        let mut headers = Vec::new();
        let mut shstrtab = vec![0u8];

        let add_name = |table: &mut Vec<u8>, name: &str| -> u32 {
            let offset = table.len() as u32;
            table.extend_from_slice(name.as_bytes());
            table.push(0);
            offset
        };

        for section in &self.sections {
            align(&mut out, 16);
            let offset = out.len() as u64;
            out.extend_from_slice(&section.data);
            headers.push(Header {
                name: add_name(&mut shstrtab, &section.name),
                kind: section.kind,
                flags: section.flags,
                address: section.address,
                offset,
                size: section.size,
                link: 0,
                info: 0,
                align: 16,
                entsize: 0,
            });
        }

        if !self.symbols.is_empty() {
            let mut strtab = vec![0u8];
            let mut symtab = vec![0u8; 24];
            for (name, value) in &self.symbols {
                let name_offset = add_name(&mut strtab, name);
                let shndx = self
                    .sections
                    .iter()
                    .position(|s| *value >= s.address && *value < s.address + s.size.max(1))
                    .map_or(0xFFF1, |index| index as u16 + 1);

                enc.u32(&mut symtab, name_offset);
                symtab.push(0x11);
                symtab.push(0);
                enc.u16(&mut symtab, shndx);
                enc.u64(&mut symtab, *value);
                enc.u64(&mut symtab, 0);
            }

            let symtab_index = headers.len() as u32 + 1;
            align(&mut out, 8);
            let symtab_offset = out.len() as u64;
            out.extend_from_slice(&symtab);
            headers.push(Header {
                name: add_name(&mut shstrtab, ".symtab"),
                kind: SHT_SYMTAB,
                flags: 0,
                address: 0,
                offset: symtab_offset,
                size: symtab.len() as u64,
                link: symtab_index + 1,
                info: 1,
                align: 8,
                entsize: 24,
            });

            let strtab_offset = out.len() as u64;
            out.extend_from_slice(&strtab);
            headers.push(Header {
                name: add_name(&mut shstrtab, ".strtab"),
                kind: SHT_STRTAB,
                flags: 0,
                address: 0,
                offset: strtab_offset,
                size: strtab.len() as u64,
                link: 0,
                info: 0,
                align: 1,
                entsize: 0,
            });
        }

        let shstrtab_name = add_name(&mut shstrtab, ".shstrtab");
        let shstrtab_offset = out.len() as u64;
        out.extend_from_slice(&shstrtab);
        headers.push(Header {
            name: shstrtab_name,
            kind: SHT_STRTAB,
            flags: 0,
            address: 0,
            offset: shstrtab_offset,
            size: shstrtab.len() as u64,
            link: 0,
            info: 0,
            align: 1,
            entsize: 0,
        });

        align(&mut out, 8);
        let shoff = out.len() as u64;
        out.extend([0u8; 64]);
        for header in &headers {
            enc.u32(&mut out, header.name);
            enc.u32(&mut out, header.kind);
            enc.u64(&mut out, header.flags);
            enc.u64(&mut out, header.address);
            enc.u64(&mut out, header.offset);
            enc.u64(&mut out, header.size);
            enc.u32(&mut out, header.link);
            enc.u32(&mut out, header.info);
            enc.u64(&mut out, header.align);
            enc.u64(&mut out, header.entsize);
        }

        let shnum = headers.len() as u16 + 1;
        let elf_header = self.elf_header(&enc, 0, 0, shoff, shnum);
        out[..64].copy_from_slice(&elf_header);

        out
    }

    fn build_segments(&self) -> Vec<u8> {
        let enc = Encoder {
            big_endian: self.big_endian,
        };
        let phnum = self.sections.len() as u16;
        let mut out = vec![0u8; 64 + 56 * self.sections.len()];

        let mut program_headers = Vec::with_capacity(56 * self.sections.len());
        for section in &self.sections {
            align(&mut out, 16);
            let offset = out.len() as u64;
            out.extend_from_slice(&section.data);

            let mut flags = PF_R;
            if section.flags & SHF_WRITE != 0 {
                flags |= PF_W;
            }
            if section.flags & SHF_EXECINSTR != 0 {
                flags |= PF_X;
            }

            enc.u32(&mut program_headers, PT_LOAD);
            enc.u32(&mut program_headers, flags);
            enc.u64(&mut program_headers, offset);
            enc.u64(&mut program_headers, section.address);
            enc.u64(&mut program_headers, section.address);
            enc.u64(&mut program_headers, section.data.len() as u64);
            enc.u64(&mut program_headers, section.size);
            enc.u64(&mut program_headers, 16);
        }

        out[64..64 + program_headers.len()].copy_from_slice(&program_headers);
        let elf_header = self.elf_header(&enc, 64, phnum, 0, 0);
        out[..64].copy_from_slice(&elf_header);

        out
    }

    fn elf_header(
        &self,
        enc: &Encoder,
        phoff: u64,
        phnum: u16,
        shoff: u64,
        shnum: u16,
    ) -> Vec<u8> {
        let data_encoding = if self.big_endian { 2u8 } else { 1 };

        let mut header = Vec::with_capacity(64);
        header.extend(b"\x7fELF");
        header.extend([2u8, data_encoding, 1, 0]);
        header.extend([0u8; 8]);
        enc.u16(&mut header, 2); // ET_EXEC
        enc.u16(&mut header, 62); // EM_X86_64
        enc.u32(&mut header, 1);
        enc.u64(&mut header, self.entry);
        enc.u64(&mut header, phoff);
        enc.u64(&mut header, shoff);
        enc.u32(&mut header, 0); // e_flags
        enc.u16(&mut header, 64); // e_ehsize
        enc.u16(&mut header, 56); // e_phentsize
        enc.u16(&mut header, phnum);
        enc.u16(&mut header, 64); // e_shentsize
        enc.u16(&mut header, shnum);
        enc.u16(&mut header, shnum.saturating_sub(1)); // e_shstrndx
        header
    }
}

fn align(out: &mut Vec<u8>, alignment: usize) {
    while out.len() % alignment != 0 {
        out.push(0);
    }
}

/// Offset of the name region within a [`TypeSection`].
const NAMES_OFFSET: usize = 0x4000;

/// Writer for a Go 1.20 style type section (8-byte pointers, varint names).
///
/// Descriptors are laid out contiguously from the section base so the address of the next
/// descriptor is known before it is written, which allows self-referencing types. Names live in
/// a separate region at [`NAMES_OFFSET`].
pub struct TypeSection {
    base: u64,
    descriptors: Vec<u8>,
    names: Vec<u8>,
}

impl TypeSection {
    pub fn new(base: u64) -> Self {
        // Offset 0 means "no name", keep it unused.
        TypeSection {
            base,
            descriptors: vec![0u8; 8],
            names: Vec::new(),
        }
    }

    pub fn next_va(&self) -> u64 {
        self.base + self.descriptors.len() as u64
    }

    /// Writes an encoded name and returns its offset from the section base.
    pub fn name(&mut self, text: &str, flags: u8, tag: Option<&str>) -> u64 {
        let offset = (NAMES_OFFSET + self.names.len()) as u64;
        let flags = if tag.is_some() { flags | 0x02 } else { flags };
        self.names.push(flags);
        uvarint(&mut self.names, text.len() as u64);
        self.names.extend_from_slice(text.as_bytes());
        if let Some(tag) = tag {
            uvarint(&mut self.names, tag.len() as u64);
            self.names.extend_from_slice(tag.as_bytes());
        }
        offset
    }

    fn header(&mut self, name: Option<&str>, kind: u8) -> u64 {
        let va = self.next_va();
        let (name_off, tflag) = match name {
            Some(name) => (self.name(name, 0x01, None) as i32, 0x04u8),
            None => (0, 0),
        };

        let d = &mut self.descriptors;
        d.extend(8u64.to_le_bytes());
        d.extend(0u64.to_le_bytes());
        d.extend((va as u32).to_le_bytes());
        d.extend([tflag, 8, 8, kind]);
        d.extend(0u64.to_le_bytes());
        d.extend(0u64.to_le_bytes());
        d.extend(name_off.to_le_bytes());
        d.extend(0i32.to_le_bytes());
        va
    }

    fn words(&mut self, words: &[u64]) {
        for word in words {
            self.descriptors.extend(word.to_le_bytes());
        }
    }

    pub fn basic(&mut self, name: &str, kind: u8) -> u64 {
        self.header(Some(name), kind)
    }

    pub fn pointer(&mut self, name: Option<&str>, elem: u64) -> u64 {
        let va = self.header(name, 22);
        self.words(&[elem]);
        va
    }

    pub fn slice(&mut self, name: Option<&str>, elem: u64) -> u64 {
        let va = self.header(name, 23);
        self.words(&[elem]);
        va
    }

    pub fn array(&mut self, name: Option<&str>, elem: u64, len: u64) -> u64 {
        let va = self.header(name, 17);
        self.words(&[elem, 0, len]);
        va
    }

    pub fn chan(&mut self, name: Option<&str>, elem: u64, dir: u64) -> u64 {
        let va = self.header(name, 18);
        self.words(&[elem, dir]);
        va
    }

    pub fn map(&mut self, name: Option<&str>, key: u64, elem: u64) -> u64 {
        let va = self.header(name, 21);
        self.words(&[key, elem]);
        va
    }

    pub fn func(&mut self, params: &[u64], results: &[u64], variadic: bool) -> u64 {
        let va = self.header(None, 19);
        let out = results.len() as u16 | if variadic { 0x8000 } else { 0 };
        self.descriptors.extend((params.len() as u16).to_le_bytes());
        self.descriptors.extend(out.to_le_bytes());
        self.descriptors.extend([0u8; 4]);
        self.words(params);
        self.words(results);
        va
    }

    /// Fields are `(name, type, embedded, tag)`.
    pub fn structure(
        &mut self,
        name: Option<&str>,
        fields: &[(&str, u64, bool, Option<&str>)],
    ) -> u64 {
        let va = self.header(name, 25);
        let count = fields.len() as u64;
        self.words(&[0, va + 80, count, count]);
        for (index, (field, typ, embedded, tag)) in fields.iter().enumerate() {
            let flags = if *embedded { 0x09 } else { 0x01 };
            let name_va = self.base + self.name(field, flags, *tag);
            self.words(&[name_va, *typ, index as u64 * 8]);
        }
        va
    }

    /// Methods are `(name, func type)`.
    pub fn interface(&mut self, name: Option<&str>, methods: &[(&str, u64)]) -> u64 {
        let va = self.header(name, 20);
        let count = methods.len() as u64;
        self.words(&[0, va + 80, count, count]);
        for (method, typ) in methods {
            let name_off = self.name(method, 0x01, None) as i32;
            let typ_off = (*typ - self.base) as i32;
            self.descriptors.extend(name_off.to_le_bytes());
            self.descriptors.extend(typ_off.to_le_bytes());
        }
        va
    }

    pub fn build(mut self) -> Vec<u8> {
        assert!(self.descriptors.len() <= NAMES_OFFSET);
        self.descriptors.resize(NAMES_OFFSET, 0);
        self.descriptors.extend(self.names);
        self.descriptors
    }
}

fn uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}
