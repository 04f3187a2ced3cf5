//! # goscope Prelude
//!
//! The most commonly used types of the crate, for glob import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all goscope operations
pub use crate::Error;

/// The result type used throughout goscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Extraction result and its options
pub use crate::{extract, ExtractOptions, Metadata};

/// Low-level file parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// Result Model
// ================================================================================================

/// Build information
pub use crate::metadata::buildinfo::{BuildInfo, Module, Setting};

/// Functions and table locations
pub use crate::metadata::{Function, ModuleMeta, TabMeta};

/// Reconstructed types
pub use crate::metadata::typesystem::{InterfaceEntry, Kind, TypeEntry};

/// Runtime layout versions
pub use crate::metadata::version::LayoutVersion;
