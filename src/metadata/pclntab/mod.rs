//! Function table (pclntab) decoding.
//!
//! The pclntab maps every function's entry PC to a `_func` record holding, among other
//! things, the offset of its name. It survives stripping because the runtime needs it for stack
//! traces, which makes it the most reliable source of function names in a Go binary.
//!
//! Three header shapes exist (pointer size `p`):
//!
//! - **1.2**: `nfunc` at 8, function table entries `(pc, funcoff)` of two words at `8 + p`,
//!   name offsets relative to the table start.
//! - **1.16**: `nfunc`, `nfiles` and five table offsets (`funcname`, `cu`, `filetab`, `pctab`,
//!   `pcln`) as words from 8, entries of two words at `pcln`.
//! - **1.18 / 1.20**: as 1.16 with `textStart` inserted after `nfiles`; entries are two `u32`
//!   `(entryoff, funcoff)` pairs and PCs are relative to `textStart`.
//!
//! Every table carries `nfunc + 1` entries, the last one being the end of the final function.
//!
//! # Key Components
//!
//! - [`PclnHeader`] - Decoded header of any layout
//! - [`FunctionTable`] - Header plus table bytes, yielding [`RawFunction`] records and files
//! - [`stdlib`] - Package name derivation and standard library classification

pub mod stdlib;

use crate::{
    file::{parser::Parser, File},
    metadata::version::{LayoutVersion, PclnTabLocation},
    Error::MalformedFunctionTable,
    Result,
};

/// Decoded function table header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PclnHeader {
    /// Layout the header was decoded with
    pub layout: LayoutVersion,
    /// Virtual address of the header
    pub va: u64,
    /// Minimum instruction size (1 on x86, 4 on most RISC targets)
    pub quantum: u8,
    /// Pointer size in bytes
    pub ptr_size: usize,
    /// Number of functions
    pub nfunc: u64,
    /// Number of file table entries (1.16 and later)
    pub nfiles: u64,
    /// Base of the entry offsets (1.18 and later), `0` if not recorded
    pub text_start: u64,
    /// Offset of the function name table
    pub funcname_offset: u64,
    /// Offset of the compilation unit table (1.16 and later)
    pub cu_offset: u64,
    /// Offset of the file name table (1.16 and later)
    pub filetab_offset: u64,
    /// Offset of the pc-value table (1.16 and later)
    pub pctab_offset: u64,
    /// Offset of the function table entries; `_func` offsets are relative to it
    pub functab_offset: u64,
}

impl PclnHeader {
    /// Reads the header of the given layout from the start of `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data is shorter than the header and
    /// [`crate::Error::MalformedFunctionTable`] for an unsupported pointer size.
    pub fn read(data: &[u8], va: u64, layout: LayoutVersion, file: &File) -> Result<Self> {
        if data.len() < 8 {
            return Err(out_of_bounds_error!());
        }

        let quantum = data[6];
        let ptr_size = usize::from(data[7]);
        if ptr_size != 4 && ptr_size != 8 {
            return Err(MalformedFunctionTable(format!(
                "invalid pointer size {}",
                ptr_size
            )));
        }

        let mut parser = Parser::new(data)
            .with_endian(file.endianness())
            .with_ptr_size(ptr_size);
        parser.seek(8)?;

        let mut header = PclnHeader {
            layout,
            va,
            quantum,
            ptr_size,
            nfunc: parser.read_ptr()?,
            nfiles: 0,
            text_start: 0,
            funcname_offset: 0,
            cu_offset: 0,
            filetab_offset: 0,
            pctab_offset: 0,
            functab_offset: 0,
        };

        match layout {
            LayoutVersion::V1_2 => {
                header.functab_offset = 8 + ptr_size as u64;
            }
            LayoutVersion::V1_16 => {
                header.nfiles = parser.read_ptr()?;
                header.funcname_offset = parser.read_ptr()?;
                header.cu_offset = parser.read_ptr()?;
                header.filetab_offset = parser.read_ptr()?;
                header.pctab_offset = parser.read_ptr()?;
                header.functab_offset = parser.read_ptr()?;
            }
            LayoutVersion::V1_18 | LayoutVersion::V1_20 => {
                header.nfiles = parser.read_ptr()?;
                header.text_start = parser.read_ptr()?;
                header.funcname_offset = parser.read_ptr()?;
                header.cu_offset = parser.read_ptr()?;
                header.filetab_offset = parser.read_ptr()?;
                header.pctab_offset = parser.read_ptr()?;
                header.functab_offset = parser.read_ptr()?;
            }
        }

        Ok(header)
    }

    /// Virtual address of the first function table entry.
    #[must_use]
    pub fn functab_va(&self) -> u64 {
        self.va.wrapping_add(self.functab_offset)
    }
}

/// A function as found in the table, before package classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFunction {
    /// Entry VA
    pub start: u64,
    /// VA of the next function's entry (or the table end)
    pub end: u64,
    /// Fully qualified name
    pub name: String,
}

/// A located and header-decoded function table.
pub struct FunctionTable<'a> {
    header: PclnHeader,
    data: &'a [u8],
    file: &'a File,
}

impl<'a> FunctionTable<'a> {
    /// Decodes the header of the table at `location`.
    ///
    /// # Errors
    /// Returns an error if the table bytes are not mapped or the header cannot be read.
    pub fn new(file: &'a File, location: &PclnTabLocation) -> Result<Self> {
        let data = file.bytes_from(location.va)?;
        let header = PclnHeader::read(data, location.va, location.layout, file)?;

        Ok(FunctionTable { header, data, file })
    }

    /// The decoded header.
    #[must_use]
    pub fn header(&self) -> &PclnHeader {
        &self.header
    }

    fn parser_at(&self, offset: u64) -> Result<Parser<'a>> {
        let offset = usize::try_from(offset).map_err(|_| out_of_bounds_error!())?;
        let mut parser = Parser::new(self.data)
            .with_endian(self.file.endianness())
            .with_ptr_size(self.header.ptr_size);
        parser.seek(offset)?;
        Ok(parser)
    }

    /// Decodes every function record.
    ///
    /// `text_fallback` replaces a zero `textStart` in 1.18+ tables, usually with the module
    /// data's `text` field. Records whose name cannot be read are skipped.
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedFunctionTable`] if the declared function count does not
    /// fit in the table.
    pub fn functions(&self, text_fallback: u64) -> Result<Vec<RawFunction>> {
        let header = &self.header;
        let entry_size = header.layout.functab_entry_size(header.ptr_size) as u64;

        let fits = header
            .nfunc
            .checked_add(1)
            .and_then(|entries| entries.checked_mul(entry_size))
            .and_then(|size| size.checked_add(header.functab_offset))
            .is_some_and(|end| end <= self.data.len() as u64);
        if header.nfunc == 0 || !fits {
            return Err(MalformedFunctionTable(format!(
                "{} functions do not fit in a table of {} bytes",
                header.nfunc,
                self.data.len()
            )));
        }

        let text_start = if header.text_start == 0 {
            text_fallback
        } else {
            header.text_start
        };

        let mut entries = Vec::with_capacity(header.nfunc as usize + 1);
        let mut parser = self.parser_at(header.functab_offset)?;
        for _ in 0..=header.nfunc {
            let entry = match header.layout {
                LayoutVersion::V1_2 | LayoutVersion::V1_16 => {
                    (parser.read_ptr()?, parser.read_ptr()?)
                }
                LayoutVersion::V1_18 | LayoutVersion::V1_20 => {
                    let entry_offset = parser.read::<u32>()?;
                    let func_offset = parser.read::<u32>()?;
                    (
                        text_start.wrapping_add(u64::from(entry_offset)),
                        u64::from(func_offset),
                    )
                }
            };
            entries.push(entry);
        }

        let mut functions = Vec::with_capacity(header.nfunc as usize);
        for window in entries.windows(2) {
            let (start, func_offset) = window[0];
            let (end, _) = window[1];

            if end < start {
                return Err(MalformedFunctionTable(format!(
                    "function at 0x{:x} ends before it starts (0x{:x})",
                    start, end
                )));
            }

            match self.function_name(func_offset) {
                Ok(name) => functions.push(RawFunction { start, end, name }),
                Err(error) => {
                    log::debug!("Skipping function at 0x{:x}: {}", start, error);
                }
            }
        }

        Ok(functions)
    }

    fn function_name(&self, func_offset: u64) -> Result<String> {
        let header = &self.header;

        let record = match header.layout {
            LayoutVersion::V1_2 => func_offset,
            _ => header
                .functab_offset
                .checked_add(func_offset)
                .ok_or(out_of_bounds_error!())?,
        };
        let name_field = record
            .checked_add(header.layout.func_nameoff_offset(header.ptr_size) as u64)
            .ok_or(out_of_bounds_error!())?;

        let name_offset = self.parser_at(name_field)?.read::<i32>()?;
        if name_offset < 0 {
            return Err(malformed_error!("Negative name offset {}", name_offset));
        }

        let base = match header.layout {
            LayoutVersion::V1_2 => 0,
            _ => header.funcname_offset,
        };
        let name_position = base
            .checked_add(name_offset as u64)
            .ok_or(out_of_bounds_error!())?;

        self.parser_at(name_position)?.read_string_utf8()
    }

    /// Decodes the source file table.
    ///
    /// # Errors
    /// Returns an error if the file table lies outside the function table data, and
    /// [`crate::Error::MalformedFunctionTable`] if its declared count does not fit.
    pub fn files(&self) -> Result<Vec<String>> {
        let header = &self.header;

        match header.layout {
            LayoutVersion::V1_2 => {
                let ptr_size = header.ptr_size as u64;
                let file_offset_field = header
                    .nfunc
                    .checked_mul(2)
                    .and_then(|words| words.checked_add(1))
                    .and_then(|words| words.checked_mul(ptr_size))
                    .and_then(|size| size.checked_add(header.functab_offset))
                    .ok_or(out_of_bounds_error!())?;

                let file_table = u64::from(self.parser_at(file_offset_field)?.read::<u32>()?);
                let mut parser = self.parser_at(file_table)?;
                let nfiles = parser.read::<u32>()?;

                // The count includes an unused zeroth entry
                let entries = u64::from(nfiles.saturating_sub(1));
                if entries * 4 > parser.remaining() as u64 {
                    return Err(MalformedFunctionTable(format!(
                        "{} files do not fit in the file table",
                        nfiles
                    )));
                }

                let mut files = Vec::with_capacity(entries as usize);
                for _ in 0..entries {
                    let string_offset = u64::from(parser.read::<u32>()?);
                    files.push(self.parser_at(string_offset)?.read_string_utf8()?);
                }
                Ok(files)
            }
            _ => {
                let mut parser = self.parser_at(header.filetab_offset)?;
                let mut files = Vec::new();
                for _ in 0..header.nfiles {
                    if !parser.has_more_data() {
                        break;
                    }
                    files.push(parser.read_string_utf8()?);
                }
                Ok(files)
            }
        }
    }
}
