use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into two groups. Failures that prevent establishing the shared layout
/// context of a binary ([`Error::UnsupportedFormat`], [`Error::UnknownVersion`],
/// [`Error::ModuleDataNotFound`]) abort an extraction run. The remaining Go-specific variants
/// are stage-local: the extraction degrades the affected part of the result and logs the
/// failure instead of returning it.
///
/// # Error Categories
///
/// ## File Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond file or section boundaries
/// - [`Error::UnsupportedFormat`] - No supported container signature matched
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - ELF/PE/Mach-O parsing errors from goblin crate
///
/// ## Go Runtime Metadata Errors
/// - [`Error::UnknownVersion`] - No pclntab layout could be determined
/// - [`Error::ModuleDataNotFound`] - The root module record could not be located
/// - [`Error::MalformedFunctionTable`] - The pclntab is internally inconsistent
/// - [`Error::BuildInfoAbsent`] / [`Error::BuildInfoTruncated`] - Build info missing or cut short
/// - [`Error::TypeDecodeFailure`] - A single type descriptor could not be decoded
///
/// # Examples
///
/// ```rust,no_run
/// use goscope::{Error, ExtractOptions, Metadata};
/// use std::path::Path;
///
/// match Metadata::from_file(Path::new("sample.bin"), &ExtractOptions::default()) {
///     Ok(metadata) => println!("Go {}", metadata.version),
///     Err(Error::UnsupportedFormat) => eprintln!("not an ELF, PE or Mach-O file"),
///     Err(Error::UnknownVersion) => eprintln!("no Go function table found"),
///     Err(e) => eprintln!("extraction failed: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // File parsing Errors
    /// The file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    ///
    /// Every read of binary data is bounds-checked; this error replaces what would otherwise
    /// be a panic or an invalid memory access.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The container format is not supported.
    ///
    /// Raised when none of the ELF, PE or thin Mach-O signatures match the start of the file.
    #[error("This file type is not supported")]
    UnsupportedFormat,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during ELF/PE/Mach-O parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// No known pclntab magic was found and no version override was given.
    ///
    /// Also returned for override strings that name a release older than the supported layouts.
    #[error("Unable to determine the Go runtime layout version")]
    UnknownVersion,

    /// The runtime module record could not be located.
    ///
    /// Neither the `runtime.firstmoduledata` symbol nor the heuristic scan produced a record
    /// consistent with the function table.
    #[error("Failed to locate the runtime module data")]
    ModuleDataNotFound,

    /// The function table is internally inconsistent.
    #[error("Malformed function table - {0}")]
    MalformedFunctionTable(String),

    /// No build info blob is present in the binary.
    #[error("No build info present")]
    BuildInfoAbsent,

    /// The build info blob was found, but could only be decoded partially.
    #[error("Build info truncated - {0}")]
    BuildInfoTruncated(String),

    /// A single type descriptor could not be decoded.
    #[error("Failed to decode type at 0x{va:x} - {message}")]
    TypeDecodeFailure {
        /// Virtual address of the type descriptor
        va: u64,
        /// Description of the failure
        message: String,
    },
}
