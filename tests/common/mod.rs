//! Synthetic Go executables for integration tests.
//!
//! [`GoImage`] writes a little-endian ELF64 x86-64 file laid out like the output of the Go 1.21
//! linker: a 1.20 layout function table, `runtime.firstmoduledata` in `.noptrdata`, a type
//! section with cyclic types, one itab and an inline build information blob.

#![allow(dead_code)]

pub const TEXT: u64 = 0x40_1000;
pub const TYPES: u64 = 0x48_0000;
pub const PCLNTAB: u64 = 0x50_0000;
pub const BUILDINFO: u64 = 0x52_0000;
pub const NOPTRDATA: u64 = 0x54_0000;
pub const TYPELINKS: u64 = 0x56_0000;
pub const ITABLINKS: u64 = 0x57_0000;

/// Address of the module data record inside `.noptrdata`.
pub const MODULEDATA: u64 = NOPTRDATA + 0x200;
/// Address of the single itab inside `.noptrdata`.
pub const ITAB: u64 = NOPTRDATA + 0x100;

/// Functions in table order with their sizes.
pub const FUNCTIONS: &[(&str, u32)] = &[
    ("main.main", 0x40),
    ("main.helper", 0x20),
    ("github.com/acme/widget.(*Gear).Spin", 0x30),
    ("runtime.main", 0x30),
    ("fmt.Println", 0x20),
    ("internal/cpu.Initialize", 0x20),
];

pub const SOURCE_FILES: &[&str] = &["/src/app/main.go", "/usr/local/go/src/runtime/proc.go"];

const MODINFO: &str = "path\texample.com/app\n\
    mod\texample.com/app\t(devel)\t\n\
    dep\tgithub.com/acme/widget\tv1.4.0\th1:w1dg3t=\n\
    =>\t../widget\t(devel)\t\n\
    dep\tgolang.org/x/sys\tv0.13.0\th1:sys=\n\
    build\t-compiler=gc\n\
    build\tCGO_ENABLED=0\n\
    build\tGOARCH=amd64\n\
    build\tGOOS=linux\n";

const START_SENTINEL: [u8; 16] = [
    0x30, 0x77, 0xaf, 0x0c, 0x92, 0x74, 0x08, 0x02, 0x41, 0xe1, 0xc1, 0x07, 0xe6, 0xd6, 0x18, 0xe6,
];
const END_SENTINEL: [u8; 16] = [
    0xf9, 0x32, 0x43, 0x31, 0x86, 0x18, 0x20, 0x72, 0x00, 0x82, 0x42, 0x10, 0x41, 0x16, 0xd8, 0xf2,
];

/// Shape of the build information blob.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum BuildInfoBlob {
    Complete,
    /// Cut inside the second dependency line, without end sentinel
    Truncated,
    Missing,
}

/// Descriptor addresses of the interesting types.
#[derive(Debug, Clone, Copy)]
pub struct TypeVas {
    pub int: u64,
    pub string: u64,
    pub node: u64,
    pub node_ptr: u64,
    pub list: u64,
    pub shape: u64,
    pub weird: u64,
    pub weird_ptr: u64,
    pub config: u64,
    pub printf: u64,
}

/// Builder for a synthetic Go executable.
pub struct GoImage {
    symbol: bool,
    build_info: BuildInfoBlob,
}

impl Default for GoImage {
    fn default() -> Self {
        GoImage {
            symbol: true,
            build_info: BuildInfoBlob::Complete,
        }
    }
}

impl GoImage {
    /// Drops `runtime.firstmoduledata` from the symbol table.
    pub fn stripped(mut self) -> Self {
        self.symbol = false;
        self
    }

    pub fn build_info(mut self, blob: BuildInfoBlob) -> Self {
        self.build_info = blob;
        self
    }

    pub fn build(&self) -> (Vec<u8>, TypeVas) {
        let (types, vas, typelinks) = type_section();
        let (pclntab, functab_offset, filetab) = pclntab();

        let mut noptrdata = vec![0u8; 0x400];
        // Decoy: a pointer to the table that is not a module data record
        put(&mut noptrdata, 0, PCLNTAB);
        put(&mut noptrdata, 0x100, vas.shape);
        put(&mut noptrdata, 0x108, vas.node_ptr);

        let nfunc = FUNCTIONS.len() as u64;
        let mut words = vec![0u64; 50];
        words[0] = PCLNTAB;
        words[7..10].copy_from_slice(&[PCLNTAB + filetab.0, filetab.1, filetab.1]);
        words[16..19].copy_from_slice(&[PCLNTAB + functab_offset, nfunc + 1, nfunc + 1]);
        words[20] = TEXT;
        words[21] = TEXT + text_size();
        words[22] = TEXT;
        words[23] = TEXT + 0x200;
        words[37] = TYPES;
        words[38] = TYPES + types.len() as u64;
        let links = typelinks.len() as u64 / 4;
        words[44..47].copy_from_slice(&[TYPELINKS, links, links]);
        words[47..50].copy_from_slice(&[ITABLINKS, 1, 1]);
        for (index, word) in words.iter().enumerate() {
            put(&mut noptrdata, 0x200 + index * 8, *word);
        }

        let mut elf = ElfWriter::default();
        elf.section(".text", TEXT, FLAGS_CODE, vec![0xCC; 0x200]);
        elf.section(".rodata", TYPES, FLAGS_RODATA, types);
        elf.section(".gopclntab", PCLNTAB, FLAGS_RODATA, pclntab);
        match self.build_info {
            BuildInfoBlob::Complete => {
                elf.section(".go.buildinfo", BUILDINFO, FLAGS_DATA, build_info(false));
            }
            BuildInfoBlob::Truncated => {
                elf.section(".go.buildinfo", BUILDINFO, FLAGS_DATA, build_info(true));
            }
            BuildInfoBlob::Missing => {}
        }
        elf.section(".noptrdata", NOPTRDATA, FLAGS_DATA, noptrdata);
        elf.section(".typelink", TYPELINKS, FLAGS_RODATA, typelinks);
        elf.section(".itablink", ITABLINKS, FLAGS_RODATA, ITAB.to_le_bytes().to_vec());

        elf.symbol("main.main", TEXT);
        if self.symbol {
            elf.symbol("runtime.firstmoduledata", MODULEDATA);
        }

        (elf.build(TEXT), vas)
    }
}

fn put(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn text_size() -> u64 {
    FUNCTIONS.iter().map(|(_, size)| u64::from(*size)).sum()
}

/// Returns the table, the functab offset and the `(offset, length)` of the file table.
fn pclntab() -> (Vec<u8>, u64, (u64, u64)) {
    let nfunc = FUNCTIONS.len();

    let mut names = Vec::new();
    let mut name_offsets = Vec::new();
    for (name, _) in FUNCTIONS {
        name_offsets.push(names.len() as i32);
        names.extend_from_slice(name.as_bytes());
        names.push(0);
    }

    let mut files = Vec::new();
    for file in SOURCE_FILES {
        files.extend_from_slice(file.as_bytes());
        files.push(0);
    }

    let funcname = 72u64;
    let filetab = funcname + names.len() as u64;
    let pctab = filetab + files.len() as u64;
    let pcln = (pctab + 8 + 7) & !7;

    let mut t = Vec::new();
    t.extend(0xFFFF_FFF1u32.to_le_bytes());
    t.extend([0u8, 0, 1, 8]);
    for word in [
        nfunc as u64,
        SOURCE_FILES.len() as u64,
        TEXT,
        funcname,
        pctab,
        filetab,
        pctab,
        pcln,
    ] {
        t.extend(word.to_le_bytes());
    }
    t.extend(&names);
    t.extend(&files);
    t.resize(pcln as usize, 0);

    let records = (nfunc as u32 + 1) * 8;
    let mut entry = 0u32;
    for (index, (_, size)) in FUNCTIONS.iter().enumerate() {
        t.extend(entry.to_le_bytes());
        t.extend((records + index as u32 * 16).to_le_bytes());
        entry += size;
    }
    t.extend(entry.to_le_bytes());
    t.extend(0u32.to_le_bytes());

    let mut entry = 0u32;
    for (index, (_, size)) in FUNCTIONS.iter().enumerate() {
        t.extend(entry.to_le_bytes());
        t.extend(name_offsets[index].to_le_bytes());
        t.extend([0u8; 8]);
        entry += size;
    }

    (t, pcln, (filetab, files.len() as u64))
}

fn build_info(truncated: bool) -> Vec<u8> {
    let mut modinfo = START_SENTINEL.to_vec();
    if truncated {
        let cut = MODINFO.find("golang.org/x/s").unwrap_or(MODINFO.len());
        modinfo.extend_from_slice(MODINFO[..cut].as_bytes());
    } else {
        modinfo.extend_from_slice(MODINFO.as_bytes());
        modinfo.extend_from_slice(&END_SENTINEL);
    }

    let version = "go1.21.4";
    let mut blob = b"\xff Go buildinf:".to_vec();
    blob.push(8);
    blob.push(0x2);
    blob.resize(32, 0);
    uvarint(&mut blob, version.len() as u64);
    blob.extend_from_slice(version.as_bytes());
    uvarint(&mut blob, modinfo.len() as u64);
    blob.extend_from_slice(&modinfo);
    blob.resize(blob.len().next_multiple_of(16), 0);
    blob
}

/// Returns the type section, the interesting addresses and the typelinks table.
fn type_section() -> (Vec<u8>, TypeVas, Vec<u8>) {
    let mut types = TypeWriter::new(TYPES);
    let int = types.named(2, "int");
    let string = types.named(24, "string");
    let float = types.named(14, "float64");
    let boolean = types.named(1, "bool");

    let node = types.next_va();
    let node_ptr = node + 48 + 32 + 2 * 24;
    types.structure(
        Some("main.Node"),
        &[("Value", int, false, None), ("Next", node_ptr, false, None)],
    );
    types.composite(None, 22, &[node]);

    let list = types.next_va();
    types.composite(Some("main.List"), 23, &[list]);

    let area = types.func(&[], &[float], false);
    let name = types.func(&[], &[string], false);
    let shape = types.interface("main.Shape", &[("Area", area), ("Name", name)]);

    let weird = types.next_va();
    let weird_ptr = weird + 48 + 32 + 24;
    types.structure(Some("main.Weird"), &[("P", weird_ptr, false, None)]);
    types.composite(None, 22, &[weird_ptr]);

    let map = types.composite(None, 21, &[string, int]);
    let strings = types.composite(None, 23, &[string]);
    let config = types.structure(
        Some("main.Config"),
        &[
            ("Values", map, false, None),
            ("Tags", strings, false, Some(r#"json:"tags""#)),
            ("Node", node, true, None),
        ],
    );

    let ints = types.composite(None, 23, &[int]);
    let printf = types.func(&[string, ints], &[int, boolean], true);

    let mut typelinks = Vec::new();
    for va in [node, list, shape, weird, config, printf] {
        typelinks.extend(((va - TYPES) as i32).to_le_bytes());
    }

    let vas = TypeVas {
        int,
        string,
        node,
        node_ptr,
        list,
        shape,
        weird,
        weird_ptr,
        config,
        printf,
    };
    (types.finish(), vas, typelinks)
}

const NAMES_OFFSET: usize = 0x2000;

/// Writes 1.20 style descriptors; names go to a separate region so descriptor addresses are
/// predictable.
struct TypeWriter {
    base: u64,
    descriptors: Vec<u8>,
    names: Vec<u8>,
}

impl TypeWriter {
    fn new(base: u64) -> Self {
        TypeWriter {
            base,
            descriptors: vec![0u8; 8],
            names: Vec::new(),
        }
    }

    fn next_va(&self) -> u64 {
        self.base + self.descriptors.len() as u64
    }

    fn name(&mut self, text: &str, flags: u8, tag: Option<&str>) -> u64 {
        let offset = (NAMES_OFFSET + self.names.len()) as u64;
        self.names
            .push(if tag.is_some() { flags | 0x02 } else { flags });
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
        self.words(&[8, 0]);
        self.descriptors.extend((va as u32).to_le_bytes());
        self.descriptors.extend([tflag, 8, 8, kind]);
        self.words(&[0, 0]);
        self.descriptors.extend(name_off.to_le_bytes());
        self.descriptors.extend(0i32.to_le_bytes());
        va
    }

    fn words(&mut self, words: &[u64]) {
        for word in words {
            self.descriptors.extend(word.to_le_bytes());
        }
    }

    fn named(&mut self, kind: u8, name: &str) -> u64 {
        self.header(Some(name), kind)
    }

    fn composite(&mut self, name: Option<&str>, kind: u8, words: &[u64]) -> u64 {
        let va = self.header(name, kind);
        self.words(words);
        va
    }

    fn func(&mut self, params: &[u64], results: &[u64], variadic: bool) -> u64 {
        let va = self.header(None, 19);
        let out = results.len() as u16 | if variadic { 0x8000 } else { 0 };
        self.descriptors.extend((params.len() as u16).to_le_bytes());
        self.descriptors.extend(out.to_le_bytes());
        self.descriptors.extend([0u8; 4]);
        self.words(params);
        self.words(results);
        va
    }

    fn structure(&mut self, name: Option<&str>, fields: &[(&str, u64, bool, Option<&str>)]) -> u64 {
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

    fn interface(&mut self, name: &str, methods: &[(&str, u64)]) -> u64 {
        let va = self.header(Some(name), 20);
        let count = methods.len() as u64;
        self.words(&[0, va + 80, count, count]);
        for (method, typ) in methods {
            let name_off = self.name(method, 0x01, None) as i32;
            self.descriptors.extend(name_off.to_le_bytes());
            self.descriptors
                .extend(((*typ - self.base) as i32).to_le_bytes());
        }
        va
    }

    fn finish(mut self) -> Vec<u8> {
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

const SHF_WRITE: u64 = 0x1;
const SHF_ALLOC: u64 = 0x2;
const SHF_EXECINSTR: u64 = 0x4;
const FLAGS_CODE: u64 = SHF_ALLOC | SHF_EXECINSTR;
const FLAGS_RODATA: u64 = SHF_ALLOC;
const FLAGS_DATA: u64 = SHF_ALLOC | SHF_WRITE;

/// Minimal ELF64 little-endian x86-64 writer: section headers and a symbol table only.
#[derive(Default)]
struct ElfWriter {
    sections: Vec<(String, u64, u64, Vec<u8>)>,
    symbols: Vec<(String, u64)>,
}

impl ElfWriter {
    fn section(&mut self, name: &str, address: u64, flags: u64, data: Vec<u8>) {
        self.sections.push((name.to_string(), address, flags, data));
    }

    fn symbol(&mut self, name: &str, value: u64) {
        self.symbols.push((name.to_string(), value));
    }

    fn build(&self, entry: u64) -> Vec<u8> {
        // (name, type, flags, addr, offset, size, link, info, entsize)
        let mut headers: Vec<(u32, u32, u64, u64, u64, u64, u32, u32, u64)> = Vec::new();
        let mut shstrtab = vec![0u8];
        let mut out = vec![0u8; 64];

        fn add(table: &mut Vec<u8>, name: &str) -> u32 {
            let offset = table.len() as u32;
            table.extend_from_slice(name.as_bytes());
            table.push(0);
            offset
        }

        for (name, address, flags, data) in &self.sections {
            out.resize(out.len().next_multiple_of(16), 0);
            let offset = out.len() as u64;
            out.extend_from_slice(data);
            let name = add(&mut shstrtab, name);
            headers.push((name, 1, *flags, *address, offset, data.len() as u64, 0, 0, 0));
        }

        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; 24];
        for (name, value) in &self.symbols {
            let name_offset = add(&mut strtab, name);
            let shndx = self
                .sections
                .iter()
                .position(|(_, address, _, data)| {
                    *value >= *address && *value < address + data.len() as u64
                })
                .map_or(0xFFF1u16, |index| index as u16 + 1);
            symtab.extend(name_offset.to_le_bytes());
            symtab.extend([0x11u8, 0]);
            symtab.extend(shndx.to_le_bytes());
            symtab.extend(value.to_le_bytes());
            symtab.extend(0u64.to_le_bytes());
        }

        let symtab_index = headers.len() as u32 + 1;
        out.resize(out.len().next_multiple_of(8), 0);
        let symtab_offset = out.len() as u64;
        out.extend_from_slice(&symtab);
        let name = add(&mut shstrtab, ".symtab");
        headers.push((
            name,
            2,
            0,
            0,
            symtab_offset,
            symtab.len() as u64,
            symtab_index + 1,
            1,
            24,
        ));

        let strtab_offset = out.len() as u64;
        out.extend_from_slice(&strtab);
        let name = add(&mut shstrtab, ".strtab");
        headers.push((name, 3, 0, 0, strtab_offset, strtab.len() as u64, 0, 0, 0));

        let name = add(&mut shstrtab, ".shstrtab");
        let shstrtab_offset = out.len() as u64;
        out.extend_from_slice(&shstrtab);
        headers.push((name, 3, 0, 0, shstrtab_offset, shstrtab.len() as u64, 0, 0, 0));

        out.resize(out.len().next_multiple_of(8), 0);
        let shoff = out.len() as u64;
        out.extend([0u8; 64]);
        for (name, kind, flags, address, offset, size, link, info, entsize) in &headers {
            out.extend(name.to_le_bytes());
            out.extend(kind.to_le_bytes());
            out.extend(flags.to_le_bytes());
            out.extend(address.to_le_bytes());
            out.extend(offset.to_le_bytes());
            out.extend(size.to_le_bytes());
            out.extend(link.to_le_bytes());
            out.extend(info.to_le_bytes());
            out.extend(8u64.to_le_bytes());
            out.extend(entsize.to_le_bytes());
        }

        let shnum = headers.len() as u16 + 1;
        let mut header = Vec::with_capacity(64);
        header.extend(b"\x7fELF");
        header.extend([2u8, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        header.extend(2u16.to_le_bytes());
        header.extend(62u16.to_le_bytes());
        header.extend(1u32.to_le_bytes());
        header.extend(entry.to_le_bytes());
        header.extend(0u64.to_le_bytes());
        header.extend(shoff.to_le_bytes());
        header.extend(0u32.to_le_bytes());
        header.extend(64u16.to_le_bytes());
        header.extend(56u16.to_le_bytes());
        header.extend(0u16.to_le_bytes());
        header.extend(64u16.to_le_bytes());
        header.extend(shnum.to_le_bytes());
        header.extend((shnum - 1).to_le_bytes());
        out[..64].copy_from_slice(&header);

        out
    }
}
