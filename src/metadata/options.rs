/// Controls which parts of the metadata an extraction produces.
///
/// The defaults produce the cheapest useful result: build information, the function table
/// location and the user functions.
///
/// ```rust
/// use goscope::ExtractOptions;
///
/// let options = ExtractOptions::default()
///     .with_std_functions(true)
///     .with_file_paths(true)
///     .with_version_override("1.21");
/// assert!(options.include_std_functions);
/// assert_eq!(options.version_override.as_deref(), Some("1.21"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Also list functions of standard library packages
    pub include_std_functions: bool,
    /// List the source file paths recorded in the function table
    pub include_file_paths: bool,
    /// Reconstruct every type reachable from `typelinks` and the itabs
    pub enumerate_types: bool,
    /// Reconstruct only the type descriptor at this address (and what it refers to).
    /// Takes precedence over `enumerate_types`; `Some(0)` counts as unset.
    pub manual_type_address: Option<u64>,
    /// Go release (`1.17`, `go1.21.4`) to decode with instead of the detected layout
    pub version_override: Option<String>,
}

impl ExtractOptions {
    /// Sets [`Self::include_std_functions`].
    #[must_use]
    pub fn with_std_functions(mut self, include: bool) -> Self {
        self.include_std_functions = include;
        self
    }

    /// Sets [`Self::include_file_paths`].
    #[must_use]
    pub fn with_file_paths(mut self, include: bool) -> Self {
        self.include_file_paths = include;
        self
    }

    /// Sets [`Self::enumerate_types`].
    #[must_use]
    pub fn with_enumerate_types(mut self, enumerate: bool) -> Self {
        self.enumerate_types = enumerate;
        self
    }

    /// Sets [`Self::manual_type_address`].
    #[must_use]
    pub fn with_manual_type_address(mut self, va: u64) -> Self {
        self.manual_type_address = Some(va);
        self
    }

    /// Sets [`Self::version_override`].
    #[must_use]
    pub fn with_version_override(mut self, version: impl Into<String>) -> Self {
        self.version_override = Some(version.into());
        self
    }

    /// The manual type address, if one is set and non-zero.
    #[must_use]
    pub fn manual_type(&self) -> Option<u64> {
        self.manual_type_address.filter(|va| *va != 0)
    }
}
