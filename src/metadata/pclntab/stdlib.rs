//! Package name derivation and standard library classification.

/// Root packages of the Go standard library.
///
/// A package belongs to the standard library if it equals one of these roots or lives below one
/// of them.
pub const STD_ROOTS: &[&str] = &[
    "archive", "bufio", "builtin", "bytes", "cmp", "compress", "container", "context", "crypto",
    "database", "debug", "embed", "encoding", "errors", "expvar", "flag", "fmt", "go", "hash",
    "html", "image", "index", "internal", "io", "iter", "log", "maps", "math", "mime", "net", "os",
    "path", "plugin", "reflect", "regexp", "runtime", "slices", "sort", "strconv", "strings",
    "sync", "syscall", "testing", "text", "time", "unicode", "unique", "unsafe", "vendor", "weak",
];

/// Symbol prefixes of compiler-generated functions, which have no package.
const GENERATED_PREFIXES: &[&str] = &["go.", "type.", "go:", "type:"];

/// Returns the package part of a fully qualified function name.
///
/// Generic instantiation brackets are removed first, then the name is cut at the first `.`
/// after the last `/`:
///
/// - `main.main` → `main`
/// - `github.com/acme/widget.(*Gear).Spin` → `github.com/acme/widget`
/// - `slices.Sort[go.shape.int]` → `slices`
/// - `type:.eq.main.Node` → `` (compiler generated)
#[must_use]
pub fn package_name(name: &str) -> String {
    let name = strip_instantiation(name);

    if GENERATED_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
    {
        return String::new();
    }

    let path_end = name.rfind('/').unwrap_or(0);
    match name[path_end..].find('.') {
        Some(dot) => name[..path_end + dot].to_string(),
        None => String::new(),
    }
}

/// Removes the outermost `[...]` instantiation from a generic function name.
fn strip_instantiation(name: &str) -> std::borrow::Cow<'_, str> {
    match (name.find('['), name.rfind(']')) {
        (Some(open), Some(close)) if open < close => {
            let mut stripped = String::with_capacity(name.len());
            stripped.push_str(&name[..open]);
            stripped.push_str(&name[close + 1..]);
            std::borrow::Cow::Owned(stripped)
        }
        _ => std::borrow::Cow::Borrowed(name),
    }
}

/// Returns `true` if `package` belongs to the standard library.
///
/// Functions without a package (compiler generated) count as standard library.
#[must_use]
pub fn is_std_package(package: &str) -> bool {
    if package.is_empty() {
        return true;
    }

    STD_ROOTS.iter().any(|root| {
        package == *root
            || (package.len() > root.len()
                && package.starts_with(root)
                && package.as_bytes()[root.len()] == b'/')
    })
}
