//! Go runtime metadata extraction.
//!
//! This module ties the individual decoders together. An extraction run fixes the runtime layout
//! from the function table magic, locates the module data, and then decodes build information,
//! functions, source files and types against that shared context.
//!
//! # Key Components
//!
//! - [`Metadata`] - The extraction result
//! - [`ExtractOptions`] - Selects the optional parts of the result
//! - [`version`] - Layout versions and function table discovery
//! - [`pclntab`] - Function table decoding and standard library classification
//! - [`moduledata`] - Discovery of `runtime.firstmoduledata`
//! - [`buildinfo`] - Build information decoding
//! - [`typesystem`] - Type descriptor decoding and rendering
//!
//! # Failure handling
//!
//! Failing to find the function table, the module data or a readable function table header
//! aborts the run. Every later stage degrades on failure: build information falls back to
//! empty fields, the function lists to empty lists, undecodable types to empty declarations.
//! Degradations are reported through the `log` facade.
//!
//! # Examples
//!
//! ```rust,no_run
//! use goscope::{ExtractOptions, Metadata};
//! use std::path::Path;
//!
//! let metadata = Metadata::from_file(Path::new("server"), &ExtractOptions::default())?;
//! println!("Go {} {}/{}", metadata.version, metadata.os, metadata.arch);
//! for function in &metadata.user_functions {
//!     println!("0x{:x} {}", function.start, function.name);
//! }
//! # Ok::<(), goscope::Error>(())
//! ```

/// Build information decoding
pub mod buildinfo;
/// Discovery of the runtime module data
pub mod moduledata;
mod options;
/// Function table decoding
pub mod pclntab;
/// Type reconstruction
pub mod typesystem;
/// Layout versions and function table discovery
pub mod version;

use std::path::Path;

use serde::Serialize;

pub use options::ExtractOptions;

use crate::{
    file::{io::Endianness, File},
    metadata::{
        buildinfo::{BuildInfo, BuildInfoReader},
        moduledata::{GoSlice, ModuleData},
        pclntab::{
            stdlib::{is_std_package, package_name},
            FunctionTable, PclnHeader, RawFunction,
        },
        typesystem::{InterfaceEntry, TypeEntry, TypeReconstructor},
        version::go_minor,
    },
    Error, Result,
};

/// A function from the function table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Function {
    /// Entry address
    pub start: u64,
    /// Address following the last instruction
    pub end: u64,
    /// Package the function belongs to, empty for compiler generated functions
    pub package: String,
    /// Fully qualified name
    pub name: String,
}

impl From<RawFunction> for Function {
    fn from(raw: RawFunction) -> Self {
        Function {
            package: package_name(&raw.name),
            start: raw.start,
            end: raw.end,
            name: raw.name,
        }
    }
}

/// Location and shape of the function table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TabMeta {
    /// Address of the function table header
    #[serde(rename = "VA")]
    pub va: u64,
    /// Layout version the table was decoded with
    pub version: String,
    /// Byte order of the target
    pub endianness: Endianness,
    /// Minimum instruction size
    pub cpu_quantum: u8,
    /// Pointer size in bytes
    pub pointer_size: usize,
}

impl TabMeta {
    fn new(header: &PclnHeader, endianness: Endianness) -> Self {
        TabMeta {
            va: header.va,
            version: header.layout.to_string(),
            endianness,
            cpu_quantum: header.quantum,
            pointer_size: header.ptr_size,
        }
    }
}

/// Location of the module data and the tables it points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModuleMeta {
    /// Address of the module data record
    #[serde(rename = "VA")]
    pub va: u64,
    /// Start of the text section
    #[serde(rename = "TextVA")]
    pub text_va: u64,
    /// Start of the type descriptor section
    pub types: u64,
    /// End of the type descriptor section
    #[serde(rename = "ETypes")]
    pub etypes: u64,
    /// Type link table
    pub typelinks: GoSlice,
    /// Itab link table
    #[serde(rename = "ITablinks")]
    pub itablinks: GoSlice,
}

impl From<&ModuleData> for ModuleMeta {
    fn from(moduledata: &ModuleData) -> Self {
        ModuleMeta {
            va: moduledata.va,
            text_va: moduledata.text,
            types: moduledata.types,
            etypes: moduledata.etypes,
            typelinks: moduledata.typelinks,
            itablinks: moduledata.itablinks,
        }
    }
}

/// Everything extracted from one Go binary.
///
/// Lists are ordered deterministically (functions in table order, types and interfaces by
/// address), so serializing two extractions of the same file gives identical output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metadata {
    /// Go toolchain version without the `go` prefix, or the layout version if unknown
    pub version: String,
    /// Target architecture (`GOARCH` naming)
    pub arch: String,
    /// Target operating system (`GOOS` naming)
    #[serde(rename = "OS")]
    pub os: String,
    /// Build information, empty if the binary carries none
    pub build_info: BuildInfo,
    /// Reconstructed types
    pub types: Vec<TypeEntry>,
    /// Reconstructed interfaces
    pub interfaces: Vec<InterfaceEntry>,
    /// Source file paths
    pub files: Vec<String>,
    /// Functions outside the standard library
    pub user_functions: Vec<Function>,
    /// Standard library functions
    pub std_functions: Vec<Function>,
    /// Function table location
    pub tab_meta: TabMeta,
    /// Module data location
    pub module_meta: ModuleMeta,
}

impl Metadata {
    /// Extracts the metadata of the executable at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be loaded, or if the function table or module data
    /// cannot be found. See [`Self::from_parsed`].
    pub fn from_file(path: &Path, options: &ExtractOptions) -> Result<Metadata> {
        let file = File::from_file(path)?;
        Self::from_parsed(&file, options)
    }

    /// Extracts the metadata of an executable held in memory.
    ///
    /// # Errors
    /// See [`Self::from_file`].
    pub fn from_mem(data: Vec<u8>, options: &ExtractOptions) -> Result<Metadata> {
        let file = File::from_mem(data)?;
        Self::from_parsed(&file, options)
    }

    /// Extracts the metadata of a loaded executable.
    ///
    /// # Errors
    /// - [`crate::Error::UnknownVersion`] if no function table is found or the override is not
    ///   a supported release
    /// - [`crate::Error::ModuleDataNotFound`] if the module data cannot be located
    /// - any error reading the function table header
    pub fn from_parsed(file: &File, options: &ExtractOptions) -> Result<Metadata> {
        let location = version::resolve(file, options.version_override.as_deref())?;
        log::debug!(
            "Function table at 0x{:x} ({}), layout {}",
            location.va,
            location.source,
            location.layout
        );

        let table = FunctionTable::new(file, &location)?;
        let header = *table.header();

        let (moduledata, method) = ModuleData::locate(file, &header)?;
        log::debug!("Module data at 0x{:x} ({})", moduledata.va, method);

        let build_info = read_build_info(file);
        let minor = go_minor(&build_info.go_version).or_else(|| {
            options
                .version_override
                .as_deref()
                .and_then(go_minor)
        });

        let (user_functions, std_functions) = match table.functions(moduledata.text) {
            Ok(functions) => split_functions(functions, options.include_std_functions),
            Err(error) => {
                log::warn!("Function table unusable: {}", error);
                (Vec::new(), Vec::new())
            }
        };

        let files = if options.include_file_paths {
            table.files().unwrap_or_else(|error| {
                log::warn!("File table unusable: {}", error);
                Vec::new()
            })
        } else {
            Vec::new()
        };

        let (types, interfaces) = match options.manual_type() {
            Some(va) => {
                let mut reconstructor = TypeReconstructor::new(file, &moduledata, minor);
                (reconstructor.manual(va), Vec::new())
            }
            None if options.enumerate_types => {
                TypeReconstructor::new(file, &moduledata, minor).enumerate()
            }
            None => (Vec::new(), Vec::new()),
        };

        let version = match build_info.go_version.as_str() {
            "" => options
                .version_override
                .clone()
                .unwrap_or_else(|| location.layout.to_string()),
            known => known.strip_prefix("go").unwrap_or(known).to_string(),
        };
        let arch = build_info
            .setting("GOARCH")
            .unwrap_or_else(|| file.arch())
            .to_string();
        let os = build_info
            .setting("GOOS")
            .unwrap_or_else(|| file.os())
            .to_string();

        Ok(Metadata {
            version,
            arch,
            os,
            build_info,
            types,
            interfaces,
            files,
            user_functions,
            std_functions,
            tab_meta: TabMeta::new(&header, file.endianness()),
            module_meta: ModuleMeta::from(&moduledata),
        })
    }
}

fn read_build_info(file: &File) -> BuildInfo {
    let mut reader = BuildInfoReader::new(file);
    match reader.read() {
        Ok(()) => {}
        Err(Error::BuildInfoAbsent) => log::debug!("No build info present"),
        Err(error) => log::warn!("Build info incomplete: {}", error),
    }
    reader.into_inner()
}

/// Splits functions into user and standard library lists, dropping the latter unless requested.
fn split_functions(functions: Vec<RawFunction>, include_std: bool) -> (Vec<Function>, Vec<Function>) {
    let mut user = Vec::new();
    let mut std = Vec::new();

    for function in functions.into_iter().map(Function::from) {
        if !is_std_package(&function.package) {
            user.push(function);
        } else if include_std {
            std.push(function);
        }
    }

    (user, std)
}
