//! Decoding of `abi.Type` descriptors and their encoded names.
//!
//! Every descriptor starts with a fixed header of `4p + 16` bytes (pointer size `p`):
//!
//! ```text
//! size       uintptr
//! ptrdata    uintptr
//! hash       uint32
//! tflag      uint8
//! align      uint8
//! fieldAlign uint8
//! kind       uint8
//! equal      func pointer
//! gcdata     *byte
//! str        nameOff (int32, relative to moduledata.types)
//! ptrToThis  typeOff (int32)
//! ```
//!
//! Composite kinds continue with a kind-specific block, decoded into a [`Shape`].

use bitflags::bitflags;

use super::kind::{ChanDir, Kind, TFlag};
use crate::{
    file::{parser::Parser, File},
    metadata::{
        moduledata::{GoSlice, ModuleData},
        version::LayoutVersion,
    },
    Error, Result,
};

/// Size of the uncommon block that may sit between a func descriptor and its parameters.
const UNCOMMON_SIZE: usize = 16;

/// Bit of a func descriptor's `outCount` marking a variadic final parameter.
const VARIADIC_FLAG: u16 = 0x8000;

bitflags! {
    /// The first byte of an encoded name.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NameFlags: u8 {
        /// The name is exported
        const EXPORTED = 0x01;
        /// A tag string follows the name
        const HAS_TAG = 0x02;
        /// A package path offset follows the name and tag
        const HAS_PKG_PATH = 0x04;
        /// The struct field is embedded (Go 1.19 and later)
        const EMBEDDED = 0x08;
    }
}

/// How the length prefixes of encoded names are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameEncoding {
    /// Big-endian `u16` (before Go 1.17)
    Legacy,
    /// Unsigned varint (Go 1.17 and later)
    Varint,
    /// Decide per name by looking at the first length byte
    Probe,
}

impl NameEncoding {
    /// Picks the encoding for a layout, refined by the toolchain minor release when known.
    ///
    /// The 1.16 layout covers Go 1.16 and 1.17, which straddle the encoding change.
    #[must_use]
    pub fn select(layout: LayoutVersion, go_minor: Option<u32>) -> NameEncoding {
        match layout {
            LayoutVersion::V1_2 => NameEncoding::Legacy,
            LayoutVersion::V1_18 | LayoutVersion::V1_20 => NameEncoding::Varint,
            LayoutVersion::V1_16 => match go_minor {
                Some(minor) if minor >= 17 => NameEncoding::Varint,
                Some(_) => NameEncoding::Legacy,
                None => NameEncoding::Probe,
            },
        }
    }
}

/// A decoded name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Name {
    /// The identifier or type string
    pub text: String,
    /// Struct field tag
    pub tag: Option<String>,
    /// Raw name flags
    pub flags: NameFlags,
}

/// A struct field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name, the type name for embedded fields
    pub name: String,
    /// Descriptor VA of the field type
    pub typ: u64,
    /// Byte offset within the struct
    pub offset: u64,
    /// Whether the field is embedded
    pub embedded: bool,
    /// Field tag
    pub tag: Option<String>,
}

/// An interface method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    /// Method name
    pub name: String,
    /// Descriptor VA of the method's func type, if recorded
    pub typ: Option<u64>,
}

/// The kind-specific part of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Predeclared kinds and kinds without trailing data
    Basic,
    /// `[len]elem`
    Array {
        /// Element type
        elem: u64,
        /// Number of elements
        len: u64,
    },
    /// Channel of `elem`
    Chan {
        /// Element type
        elem: u64,
        /// Direction
        dir: ChanDir,
    },
    /// Function signature
    Func {
        /// Parameter types
        params: Vec<u64>,
        /// Result types
        results: Vec<u64>,
        /// The final parameter is `...T`
        variadic: bool,
    },
    /// Interface method set
    Interface {
        /// Methods in descriptor order
        methods: Vec<Method>,
    },
    /// `map[key]elem`
    Map {
        /// Key type
        key: u64,
        /// Value type
        elem: u64,
    },
    /// `*elem`
    Pointer {
        /// Pointee type
        elem: u64,
    },
    /// `[]elem`
    Slice {
        /// Element type
        elem: u64,
    },
    /// Struct fields
    Struct {
        /// Fields in declaration order
        fields: Vec<Field>,
    },
}

impl Shape {
    /// Descriptor VAs this shape refers to, in rendering order.
    #[must_use]
    pub fn children(&self) -> Vec<u64> {
        match self {
            Shape::Basic => Vec::new(),
            Shape::Array { elem, .. }
            | Shape::Chan { elem, .. }
            | Shape::Pointer { elem }
            | Shape::Slice { elem } => vec![*elem],
            Shape::Map { key, elem } => vec![*key, *elem],
            Shape::Func {
                params, results, ..
            } => params.iter().chain(results).copied().collect(),
            Shape::Interface { methods } => methods.iter().filter_map(|m| m.typ).collect(),
            Shape::Struct { fields } => fields.iter().map(|f| f.typ).collect(),
        }
    }
}

/// A decoded type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Address of the descriptor
    pub va: u64,
    /// Size of a value in bytes
    pub size: u64,
    /// Type hash
    pub hash: u32,
    /// Type flags
    pub tflag: TFlag,
    /// Kind
    pub kind: Kind,
    /// Type string, with the extra `*` removed
    pub name: String,
    /// Kind-specific data
    pub shape: Shape,
}

impl TypeDescriptor {
    /// Whether the type is referred to by its name.
    #[must_use]
    pub fn is_named(&self) -> bool {
        self.tflag.contains(TFlag::NAMED) && !self.name.is_empty()
    }
}

/// Reads descriptors and names relative to a module's type section.
pub struct DescriptorReader<'a> {
    file: &'a File,
    types: u64,
    ptr_size: usize,
    encoding: NameEncoding,
    offset_anon: bool,
}

impl<'a> DescriptorReader<'a> {
    /// Creates a reader for the module's type section.
    ///
    /// `go_minor` is the toolchain minor release from the build info, if known.
    #[must_use]
    pub fn new(file: &'a File, moduledata: &ModuleData, go_minor: Option<u32>) -> Self {
        let layout = moduledata.layout;
        DescriptorReader {
            file,
            types: moduledata.types,
            ptr_size: file.pointer_width(),
            encoding: NameEncoding::select(layout, go_minor),
            offset_anon: matches!(layout, LayoutVersion::V1_2 | LayoutVersion::V1_16)
                || go_minor.is_some_and(|minor| minor < 19),
        }
    }

    /// Size of the fixed descriptor header.
    #[must_use]
    pub fn header_size(&self) -> usize {
        4 * self.ptr_size + 16
    }

    /// Resolves a `nameOff` / `typeOff` against the type section base.
    #[must_use]
    pub fn resolve(&self, offset: i32) -> Option<u64> {
        self.types.checked_add_signed(i64::from(offset))
    }

    /// Decodes the descriptor at `va`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeDecodeFailure`] if any part of the descriptor is unreadable.
    pub fn read(&self, va: u64) -> Result<TypeDescriptor> {
        self.decode(va).map_err(|error| match error {
            Error::TypeDecodeFailure { .. } => error,
            other => Error::TypeDecodeFailure {
                va,
                message: other.to_string(),
            },
        })
    }

    fn decode(&self, va: u64) -> Result<TypeDescriptor> {
        let mut parser = self.file.parser_at(va)?;

        let size = parser.read_ptr()?;
        parser.advance_by(self.ptr_size)?;
        let hash = parser.read::<u32>()?;
        let tflag = TFlag::from_bits_retain(parser.read::<u8>()?);
        parser.advance_by(2)?;
        let kind = Kind::from_raw(parser.read::<u8>()?);
        parser.advance_by(2 * self.ptr_size)?;
        let name_off = parser.read::<i32>()?;
        parser.advance_by(4)?;

        let mut name = if name_off == 0 {
            String::new()
        } else {
            let name_va = self
                .resolve(name_off)
                .ok_or_else(|| malformed_error!("Name offset {} out of range", name_off))?;
            self.read_name(name_va)?.text
        };
        if tflag.contains(TFlag::EXTRA_STAR) && name.starts_with('*') {
            name.remove(0);
        }

        let shape = self.read_shape(&mut parser, kind, tflag)?;

        Ok(TypeDescriptor {
            va,
            size,
            hash,
            tflag,
            kind,
            name,
            shape,
        })
    }

    fn read_shape(&self, parser: &mut Parser<'_>, kind: Kind, tflag: TFlag) -> Result<Shape> {
        let shape = match kind {
            Kind::Array => {
                let elem = parser.read_ptr()?;
                parser.advance_by(self.ptr_size)?;
                let len = parser.read_ptr()?;
                Shape::Array { elem, len }
            }
            Kind::Chan => {
                let elem = parser.read_ptr()?;
                let raw = parser.read_ptr()?;
                let dir = ChanDir::from_raw(raw)
                    .ok_or_else(|| malformed_error!("Invalid channel direction {}", raw))?;
                Shape::Chan { elem, dir }
            }
            Kind::Func => {
                let in_count = parser.read::<u16>()?;
                let out_raw = parser.read::<u16>()?;

                let mut params_at = self.header_size() + if self.ptr_size == 8 { 8 } else { 4 };
                if tflag.contains(TFlag::UNCOMMON) {
                    params_at += UNCOMMON_SIZE;
                }
                parser.seek(params_at)?;

                let mut params = Vec::with_capacity(usize::from(in_count));
                for _ in 0..in_count {
                    params.push(parser.read_ptr()?);
                }
                let mut results = Vec::new();
                for _ in 0..(out_raw & !VARIADIC_FLAG) {
                    results.push(parser.read_ptr()?);
                }

                Shape::Func {
                    params,
                    results,
                    variadic: out_raw & VARIADIC_FLAG != 0,
                }
            }
            Kind::Interface => {
                parser.advance_by(self.ptr_size)?;
                let slice = self.read_slice(parser, 8)?;

                let mut methods = Vec::with_capacity(slice.len as usize);
                if slice.len > 0 {
                    let mut entries = self.file.parser_at(slice.data)?;
                    for _ in 0..slice.len {
                        let name_off = entries.read::<i32>()?;
                        let typ_off = entries.read::<i32>()?;

                        let name_va = self
                            .resolve(name_off)
                            .ok_or_else(|| malformed_error!("Method name offset {}", name_off))?;
                        let typ = match typ_off {
                            0 | -1 => None,
                            offset => self.resolve(offset),
                        };
                        methods.push(Method {
                            name: self.read_name(name_va)?.text,
                            typ,
                        });
                    }
                }
                Shape::Interface { methods }
            }
            Kind::Map => Shape::Map {
                key: parser.read_ptr()?,
                elem: parser.read_ptr()?,
            },
            Kind::Pointer => Shape::Pointer {
                elem: parser.read_ptr()?,
            },
            Kind::Slice => Shape::Slice {
                elem: parser.read_ptr()?,
            },
            Kind::Struct => {
                parser.advance_by(self.ptr_size)?;
                let slice = self.read_slice(parser, 3 * self.ptr_size)?;

                let mut fields = Vec::with_capacity(slice.len as usize);
                if slice.len > 0 {
                    let mut entries = self.file.parser_at(slice.data)?;
                    for _ in 0..slice.len {
                        let name_va = entries.read_ptr()?;
                        let typ = entries.read_ptr()?;
                        let raw_offset = entries.read_ptr()?;

                        let name = if name_va == 0 {
                            Name::default()
                        } else {
                            self.read_name(name_va)?
                        };
                        let (offset, anon_bit) = if self.offset_anon {
                            (raw_offset >> 1, raw_offset & 1 != 0)
                        } else {
                            (raw_offset, false)
                        };

                        fields.push(Field {
                            embedded: anon_bit || name.flags.contains(NameFlags::EMBEDDED),
                            name: name.text,
                            typ,
                            offset,
                            tag: name.tag,
                        });
                    }
                }
                Shape::Struct { fields }
            }
            _ => Shape::Basic,
        };

        Ok(shape)
    }

    fn read_slice(&self, parser: &mut Parser<'_>, element_size: usize) -> Result<GoSlice> {
        let slice = GoSlice {
            data: parser.read_ptr()?,
            len: parser.read_ptr()?,
            cap: parser.read_ptr()?,
        };

        let fits = slice
            .len
            .checked_mul(element_size as u64)
            .is_some_and(|bytes| bytes <= self.file.len() as u64);
        if slice.len > slice.cap || !fits {
            return Err(malformed_error!(
                "Slice of {} elements (capacity {}) is out of range",
                slice.len,
                slice.cap
            ));
        }

        Ok(slice)
    }

    /// Decodes the encoded name at `va`.
    ///
    /// # Errors
    /// Returns an error if the name is not mapped or its text is not valid UTF-8.
    pub fn read_name(&self, va: u64) -> Result<Name> {
        let data = self.file.bytes_from(va)?;
        let mut parser = Parser::new(data);

        let flags = NameFlags::from_bits_retain(parser.read::<u8>()?);
        let legacy = match self.encoding {
            NameEncoding::Legacy => true,
            NameEncoding::Varint => false,
            NameEncoding::Probe => data.len() > 2 && data[1] == 0 && data[2] != 0,
        };

        let length = read_length(&mut parser, legacy)?;
        let text = utf8(parser.read_bytes(length)?, va)?;

        let tag = if flags.contains(NameFlags::HAS_TAG) {
            let length = read_length(&mut parser, legacy)?;
            Some(utf8(parser.read_bytes(length)?, va)?)
        } else {
            None
        };

        Ok(Name { text, tag, flags })
    }
}

fn read_length(parser: &mut Parser<'_>, legacy: bool) -> Result<usize> {
    if legacy {
        Ok(usize::from(parser.read_be::<u16>()?))
    } else {
        let length = parser.read_uvarint()?;
        usize::try_from(length).map_err(|_| out_of_bounds_error!())
    }
}

fn utf8(bytes: &[u8], va: u64) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| malformed_error!("Name at 0x{:x} is not valid UTF-8", va))
}
