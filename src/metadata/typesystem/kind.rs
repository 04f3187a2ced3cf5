use std::fmt;

use bitflags::bitflags;

/// Mask selecting the kind bits of the descriptor's `kind` byte.
pub const KIND_MASK: u8 = 0x1F;

bitflags! {
    /// The `tflag` byte of a type descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TFlag: u8 {
        /// An uncommon block (method set, package path) follows the kind-specific data
        const UNCOMMON = 0x01;
        /// The stored name carries a leading `*` that is not part of the type's name
        const EXTRA_STAR = 0x02;
        /// The type has a name (defined or predeclared type)
        const NAMED = 0x04;
        /// Equality and hashing may treat the value as plain memory
        const REGULAR_MEMORY = 0x08;
    }
}

/// The kind of a Go type.
///
/// Values outside `1..=26` decode to [`Kind::Unknown`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Kind {
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uintptr,
    Float32,
    Float64,
    Complex64,
    Complex128,
    Array,
    Chan,
    Func,
    Interface,
    Map,
    Pointer,
    Slice,
    String,
    Struct,
    UnsafePointer,
    /// A kind value this crate does not know
    Unknown(u8),
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Kind {
    /// Decodes the low five bits of a descriptor's `kind` byte.
    #[must_use]
    pub fn from_raw(raw: u8) -> Kind {
        match raw & KIND_MASK {
            1 => Kind::Bool,
            2 => Kind::Int,
            3 => Kind::Int8,
            4 => Kind::Int16,
            5 => Kind::Int32,
            6 => Kind::Int64,
            7 => Kind::Uint,
            8 => Kind::Uint8,
            9 => Kind::Uint16,
            10 => Kind::Uint32,
            11 => Kind::Uint64,
            12 => Kind::Uintptr,
            13 => Kind::Float32,
            14 => Kind::Float64,
            15 => Kind::Complex64,
            16 => Kind::Complex128,
            17 => Kind::Array,
            18 => Kind::Chan,
            19 => Kind::Func,
            20 => Kind::Interface,
            21 => Kind::Map,
            22 => Kind::Pointer,
            23 => Kind::Slice,
            24 => Kind::String,
            25 => Kind::Struct,
            26 => Kind::UnsafePointer,
            other => Kind::Unknown(other),
        }
    }

    /// The Go spelling of predeclared kinds, `None` for composites.
    #[must_use]
    pub fn builtin_name(self) -> Option<&'static str> {
        let name = match self {
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Int8 => "int8",
            Kind::Int16 => "int16",
            Kind::Int32 => "int32",
            Kind::Int64 => "int64",
            Kind::Uint => "uint",
            Kind::Uint8 => "uint8",
            Kind::Uint16 => "uint16",
            Kind::Uint32 => "uint32",
            Kind::Uint64 => "uint64",
            Kind::Uintptr => "uintptr",
            Kind::Float32 => "float32",
            Kind::Float64 => "float64",
            Kind::Complex64 => "complex64",
            Kind::Complex128 => "complex128",
            Kind::String => "string",
            Kind::UnsafePointer => "unsafe.Pointer",
            Kind::Array
            | Kind::Chan
            | Kind::Func
            | Kind::Interface
            | Kind::Map
            | Kind::Pointer
            | Kind::Slice
            | Kind::Struct
            | Kind::Unknown(_) => return None,
        };
        Some(name)
    }
}

/// Direction of a channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanDir {
    /// `<-chan T`
    Recv,
    /// `chan<- T`
    Send,
    /// `chan T`
    Both,
}

impl ChanDir {
    /// Decodes the `dir` word of a channel descriptor.
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<ChanDir> {
        match raw {
            1 => Some(ChanDir::Recv),
            2 => Some(ChanDir::Send),
            3 => Some(ChanDir::Both),
            _ => None,
        }
    }

    /// Prefix placed before the element type.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            ChanDir::Recv => "<-chan ",
            ChanDir::Send => "chan<- ",
            ChanDir::Both => "chan ",
        }
    }
}
