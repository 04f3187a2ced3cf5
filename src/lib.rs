// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # goscope
//!
//! Recovery of Go runtime metadata from compiled executables, without debug information.
//!
//! Go binaries carry a surprising amount of metadata for the runtime's own use: the function
//! table used for stack traces, type descriptors used for interfaces and reflection, and the
//! build information printed by `go version -m`. All of it survives `-ldflags="-s -w"`.
//! `goscope` locates and decodes these structures from ELF, PE and Mach-O files of any
//! architecture, including stripped binaries and binaries of unknown toolchain version.
//!
//! ## Features
//!
//! - **Layout detection** - Function table magic decides the runtime layout (Go 1.2 to current)
//! - **Function recovery** - Every function with its address range and package, split into user
//!   and standard library code
//! - **Build information** - Toolchain version, main module, dependencies, replacements, build
//!   settings
//! - **Type reconstruction** - Go pseudo-declarations for structs, interfaces and all composite
//!   types, safe against cyclic type graphs
//! - **Stripped binaries** - Heuristic discovery of the module data when symbols are gone
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use goscope::{ExtractOptions, Metadata};
//! use std::path::Path;
//!
//! let options = ExtractOptions::default()
//!     .with_std_functions(false)
//!     .with_enumerate_types(true);
//! let metadata = Metadata::from_file(Path::new("server"), &options)?;
//!
//! println!("Go {} ({}/{})", metadata.version, metadata.os, metadata.arch);
//! println!("Main module: {}", metadata.build_info.main.path);
//! for function in &metadata.user_functions {
//!     println!("0x{:x}-0x{:x} {}", function.start, function.end, function.name);
//! }
//! for entry in &metadata.types {
//!     println!("{}", entry.reconstructed);
//! }
//! # Ok::<(), goscope::Error>(())
//! ```
//!
//! The result implements `serde::Serialize`; field names follow the `PascalCase` convention of
//! the Go tooling (`Version`, `BuildInfo`, `UserFunctions`, ...).
//!
//! ## Architecture
//!
//! - [`file`] - Container loading (ELF / PE / Mach-O via `goblin`), VA translation, byte parsing
//! - [`metadata::version`] - Function table discovery and layout version resolution
//! - [`metadata::pclntab`] - Function table walking and standard library classification
//! - [`metadata::moduledata`] - Location of `runtime.firstmoduledata`
//! - [`metadata::buildinfo`] - Build information decoding
//! - [`metadata::typesystem`] - Type descriptor decoding and rendering
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`]. Only failures that prevent establishing the layout of
//! the binary are returned from an extraction; later stages degrade and report through the `log`
//! facade. See [`Error`] for the taxonomy.

#[macro_use]
pub(crate) mod error;

/// Executable loading, address translation and binary parsing.
///
/// # Key Types
///
/// - [`File`] - A loaded executable (memory-mapped or owned)
/// - [`Parser`] - Bounds-checked cursor over a byte slice
/// - [`file::container::Container`] - Format-independent view of sections and symbols
///
/// # Examples
///
/// ```rust,no_run
/// use goscope::File;
/// use std::path::Path;
///
/// let file = File::from_file(Path::new("server"))?;
/// println!("{} {}-bit", file.kind(), file.pointer_width() * 8);
/// if let Some(section) = file.section_by_name(".gopclntab") {
///     println!("pclntab at 0x{:x}", section.address);
/// }
/// # Ok::<(), goscope::Error>(())
/// ```
pub mod file;

/// Decoding of Go runtime metadata.
pub mod metadata;

/// Convenient re-exports of the most commonly used types.
///
/// ```rust,no_run
/// use goscope::prelude::*;
///
/// let metadata = Metadata::from_file("server".as_ref(), &ExtractOptions::default())?;
/// # Ok::<(), goscope::Error>(())
/// ```
pub mod prelude;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// `goscope` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `goscope` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// Extraction entry points and result model.
///
/// # Example
///
/// ```rust,no_run
/// use goscope::{ExtractOptions, Metadata};
///
/// let data = std::fs::read("server")?;
/// let metadata = Metadata::from_mem(data, &ExtractOptions::default())?;
/// println!("{} user functions", metadata.user_functions.len());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub use metadata::{ExtractOptions, Function, Metadata};

/// Provides access to low-level file and memory parsing utilities.
pub use file::{io::Endianness, parser::Parser, File};

/// Extracts the metadata of the executable at `path`.
///
/// Shorthand for [`Metadata::from_file`].
///
/// # Errors
/// See [`Metadata::from_parsed`].
pub fn extract(path: impl AsRef<std::path::Path>, options: &ExtractOptions) -> Result<Metadata> {
    Metadata::from_file(path.as_ref(), options)
}
