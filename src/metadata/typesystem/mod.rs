//! Go type and interface reconstruction.
//!
//! The runtime keeps a descriptor for every type that may be needed dynamically (interface
//! conversions, reflection, maps). Two tables of the module data enumerate them:
//!
//! - `typelinks`: `int32` offsets of descriptors, relative to `moduledata.types`
//! - `itablinks`: pointers to itabs, whose first two words are the interface descriptor and the
//!   concrete type descriptor
//!
//! Descriptors are decoded once into an arena and rendered as Go pseudo-declarations.
//!
//! # Rendering
//!
//! Named types are referred to by name, which terminates every cycle that passes through a named
//! type. Unnamed composites (`[]T`, `*T`, `map[K]V`, `struct { ... }`, ...) render inline. An
//! unnamed type reached again while it is still being rendered becomes a `<ref 0x...>` token.
//! Inline renderings are cached per descriptor, except those containing such a token, so the
//! text of a type does not depend on the order types are visited in.
//!
//! # Key Components
//!
//! - [`TypeReconstructor`] - Arena, cache and renderer for one module
//! - [`DescriptorReader`] - Decoding of single descriptors and names
//! - [`Kind`] / [`TFlag`] - Descriptor header fields
//!
//! # Examples
//!
//! ```rust,no_run
//! use goscope::{ExtractOptions, Metadata};
//! use std::path::Path;
//!
//! let options = ExtractOptions::default().with_enumerate_types(true);
//! let metadata = Metadata::from_file(Path::new("server"), &options)?;
//! for entry in &metadata.types {
//!     if !entry.reconstructed.is_empty() {
//!         println!("0x{:x}: {}", entry.va, entry.reconstructed);
//!     }
//! }
//! # Ok::<(), goscope::Error>(())
//! ```

mod descriptor;
mod kind;

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

pub use descriptor::{
    DescriptorReader, Field, Method, Name, NameEncoding, NameFlags, Shape, TypeDescriptor,
};
pub use kind::{ChanDir, Kind, TFlag, KIND_MASK};

use crate::{file::File, metadata::moduledata::ModuleData, Error, Result};

/// Nesting depth at which inline rendering stops.
pub const MAX_DEPTH: usize = 64;

const INDENT: &str = "    ";

/// A reconstructed type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TypeEntry {
    /// Address of the type descriptor
    #[serde(rename = "VA")]
    pub va: u64,
    /// Go pseudo-declaration, empty when the descriptor cannot be decoded
    pub reconstructed: String,
}

/// A reconstructed interface, reached through an itab.
pub type InterfaceEntry = TypeEntry;

/// Decodes and renders the type descriptors of one module.
pub struct TypeReconstructor<'a> {
    file: &'a File,
    moduledata: ModuleData,
    reader: DescriptorReader<'a>,
    arena: Vec<TypeDescriptor>,
    index: HashMap<u64, usize>,
    failures: HashMap<u64, String>,
    rendered: HashMap<u64, String>,
    in_progress: HashSet<u64>,
    back_refs: usize,
}

impl<'a> TypeReconstructor<'a> {
    /// Creates a reconstructor over the module's type section.
    ///
    /// `go_minor` is the toolchain minor release from the build info, if known; it refines the
    /// name and struct field encodings.
    #[must_use]
    pub fn new(file: &'a File, moduledata: &ModuleData, go_minor: Option<u32>) -> Self {
        TypeReconstructor {
            file,
            moduledata: *moduledata,
            reader: DescriptorReader::new(file, moduledata, go_minor),
            arena: Vec::new(),
            index: HashMap::new(),
            failures: HashMap::new(),
            rendered: HashMap::new(),
            in_progress: HashSet::new(),
            back_refs: 0,
        }
    }

    /// Returns the decoded descriptor at `va`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeDecodeFailure`] if the descriptor cannot be decoded.
    pub fn descriptor(&mut self, va: u64) -> Result<&TypeDescriptor> {
        let index = self.lookup(va)?;
        Ok(&self.arena[index])
    }

    fn lookup(&mut self, va: u64) -> Result<usize> {
        if let Some(&index) = self.index.get(&va) {
            return Ok(index);
        }
        if let Some(message) = self.failures.get(&va) {
            return Err(Error::TypeDecodeFailure {
                va,
                message: message.clone(),
            });
        }

        match self.reader.read(va) {
            Ok(descriptor) => {
                let index = self.arena.len();
                self.arena.push(descriptor);
                self.index.insert(va, index);
                Ok(index)
            }
            Err(error) => {
                log::debug!("{}", error);
                self.failures.insert(va, error.to_string());
                Err(error)
            }
        }
    }

    /// Reads the descriptor addresses listed in `typelinks`.
    ///
    /// # Errors
    /// Returns an error if the table is not mapped.
    pub fn typelinks(&self) -> Result<Vec<u64>> {
        let links = self.moduledata.typelinks;
        if links.len == 0 {
            return Ok(Vec::new());
        }

        let mut parser = self.file.parser_at(links.data)?;
        let mut roots = Vec::with_capacity(links.len as usize);
        for _ in 0..links.len {
            let offset = parser.read::<i32>()?;
            if let Some(va) = self.reader.resolve(offset) {
                roots.push(va);
            }
        }
        Ok(roots)
    }

    /// Reads the `(interface, concrete type)` descriptor pairs of every itab in `itablinks`.
    ///
    /// Unreadable itabs are skipped.
    ///
    /// # Errors
    /// Returns an error if the table itself is not mapped.
    pub fn itabs(&self) -> Result<Vec<(u64, u64)>> {
        let links = self.moduledata.itablinks;
        if links.len == 0 {
            return Ok(Vec::new());
        }

        let mut parser = self.file.parser_at(links.data)?;
        let mut itabs = Vec::with_capacity(links.len as usize);
        for _ in 0..links.len {
            let itab = parser.read_ptr()?;
            let pair = self.file.parser_at(itab).and_then(|mut entry| {
                let interface = entry.read_ptr()?;
                let concrete = entry.read_ptr()?;
                Ok((interface, concrete))
            });
            match pair {
                Ok(pair) => itabs.push(pair),
                Err(error) => log::debug!("Skipping itab at 0x{:x}: {}", itab, error),
            }
        }
        Ok(itabs)
    }

    /// Reconstructs every type reachable from `typelinks` and the itabs, and every interface
    /// named by an itab.
    ///
    /// Both lists are sorted by descriptor address.
    pub fn enumerate(&mut self) -> (Vec<TypeEntry>, Vec<InterfaceEntry>) {
        let mut roots = self.typelinks().unwrap_or_else(|error| {
            log::warn!("Unable to read typelinks: {}", error);
            Vec::new()
        });
        let itabs = self.itabs().unwrap_or_else(|error| {
            log::warn!("Unable to read itablinks: {}", error);
            Vec::new()
        });
        roots.extend(itabs.iter().map(|(_, concrete)| *concrete));

        let reachable = self.discover(roots);
        let types = self.entries(reachable);
        let interfaces = itabs
            .iter()
            .map(|(interface, _)| *interface)
            .filter(|va| *va != 0)
            .collect::<BTreeSet<u64>>();
        let interfaces = self.entries(interfaces);

        (types, interfaces)
    }

    /// Reconstructs the single type at `va`, without enumerating the module.
    ///
    /// The entry renders exactly as it would in [`TypeReconstructor::enumerate`].
    pub fn manual(&mut self, va: u64) -> Vec<TypeEntry> {
        self.entries(BTreeSet::from([va]))
    }

    fn entries(&mut self, vas: BTreeSet<u64>) -> Vec<TypeEntry> {
        vas.into_iter()
            .map(|va| TypeEntry {
                va,
                reconstructed: self.declaration(va),
            })
            .collect()
    }

    /// Collects `roots` and every descriptor address reachable from them.
    fn discover(&mut self, roots: Vec<u64>) -> BTreeSet<u64> {
        let mut seen = BTreeSet::new();
        let mut pending = roots;

        while let Some(va) = pending.pop() {
            if va == 0 || !seen.insert(va) {
                continue;
            }
            if let Ok(index) = self.lookup(va) {
                pending.extend(
                    self.arena[index]
                        .shape
                        .children()
                        .into_iter()
                        .filter(|child| !seen.contains(child)),
                );
            }
        }

        seen
    }

    /// Renders the declaration of the type at `va`.
    ///
    /// Named types render as `type <name> <definition>`. Unnamed types render as their type
    /// literal, with a `<ref 0x...>` token where they refer back to themselves. Undecodable
    /// descriptors yield an empty string.
    pub fn declaration(&mut self, va: u64) -> String {
        let descriptor = match self.lookup(va) {
            Ok(index) => self.arena[index].clone(),
            Err(_) => return String::new(),
        };

        if !descriptor.is_named() {
            return self.reference(va, 0);
        }

        self.in_progress.insert(va);
        let definition = match &descriptor.shape {
            Shape::Struct { fields } => {
                let lines = self.lines(fields.len(), |this, i| this.field(&fields[i], 1));
                block("struct", &lines)
            }
            Shape::Interface { methods } => {
                let lines = self.lines(methods.len(), |this, i| this.method(&methods[i], 1));
                block("interface", &lines)
            }
            _ => self.literal(&descriptor, 1),
        };
        self.in_progress.remove(&va);

        format!("type {} {}", descriptor.name, definition)
    }

    fn lines<F>(&mut self, count: usize, mut render: F) -> Vec<String>
    where
        F: FnMut(&mut Self, usize) -> String,
    {
        let mut lines = Vec::with_capacity(count);
        for i in 0..count {
            lines.push(render(self, i));
        }
        lines
    }

    /// Text used where the type at `va` is referenced from another type.
    fn reference(&mut self, va: u64, depth: usize) -> String {
        let index = match self.lookup(va) {
            Ok(index) => index,
            Err(_) => return format!("<invalid 0x{:x}>", va),
        };
        if self.arena[index].is_named() {
            return self.arena[index].name.clone();
        }
        if let Some(text) = self.rendered.get(&va) {
            return text.clone();
        }
        if depth >= MAX_DEPTH || self.in_progress.contains(&va) {
            self.back_refs += 1;
            return format!("<ref 0x{:x}>", va);
        }

        let descriptor = self.arena[index].clone();
        let before = self.back_refs;

        self.in_progress.insert(va);
        let text = self.literal(&descriptor, depth + 1);
        self.in_progress.remove(&va);

        if self.back_refs == before {
            self.rendered.insert(va, text.clone());
        }
        text
    }

    /// The type literal of a descriptor, ignoring its name.
    fn literal(&mut self, descriptor: &TypeDescriptor, depth: usize) -> String {
        match &descriptor.shape {
            Shape::Basic => descriptor
                .kind
                .builtin_name()
                .map_or_else(|| format!("<{}>", descriptor.kind), str::to_string),
            Shape::Array { elem, len } => format!("[{}]{}", len, self.reference(*elem, depth)),
            Shape::Chan { elem, dir } => {
                format!("{}{}", dir.prefix(), self.reference(*elem, depth))
            }
            Shape::Func {
                params,
                results,
                variadic,
            } => format!(
                "func{}",
                self.signature(params, results, *variadic, depth)
            ),
            Shape::Interface { methods } => {
                let lines = self.lines(methods.len(), |this, i| this.method(&methods[i], depth));
                inline("interface", &lines)
            }
            Shape::Map { key, elem } => format!(
                "map[{}]{}",
                self.reference(*key, depth),
                self.reference(*elem, depth)
            ),
            Shape::Pointer { elem } => format!("*{}", self.reference(*elem, depth)),
            Shape::Slice { elem } => format!("[]{}", self.reference(*elem, depth)),
            Shape::Struct { fields } => {
                let lines = self.lines(fields.len(), |this, i| this.field(&fields[i], depth));
                inline("struct", &lines)
            }
        }
    }

    /// `(params) results` of a function type.
    fn signature(
        &mut self,
        params: &[u64],
        results: &[u64],
        variadic: bool,
        depth: usize,
    ) -> String {
        let mut args = Vec::with_capacity(params.len());
        for (position, param) in params.iter().enumerate() {
            if variadic && position + 1 == params.len() {
                let elem = match self.lookup(*param).map(|index| &self.arena[index].shape) {
                    Ok(Shape::Slice { elem }) => Some(*elem),
                    _ => None,
                };
                let text = match elem {
                    Some(elem) => self.reference(elem, depth),
                    None => self.reference(*param, depth),
                };
                args.push(format!("...{}", text));
            } else {
                args.push(self.reference(*param, depth));
            }
        }

        let mut outs = Vec::with_capacity(results.len());
        for result in results {
            outs.push(self.reference(*result, depth));
        }

        match outs.len() {
            0 => format!("({})", args.join(", ")),
            1 => format!("({}) {}", args.join(", "), outs[0]),
            _ => format!("({}) ({})", args.join(", "), outs.join(", ")),
        }
    }

    fn method(&mut self, method: &Method, depth: usize) -> String {
        let shape = method
            .typ
            .and_then(|va| self.lookup(va).ok())
            .map(|index| self.arena[index].shape.clone());

        match shape {
            Some(Shape::Func {
                params,
                results,
                variadic,
            }) => format!(
                "{}{}",
                method.name,
                self.signature(&params, &results, variadic, depth)
            ),
            _ => format!("{}()", method.name),
        }
    }

    fn field(&mut self, field: &Field, depth: usize) -> String {
        let typ = self.reference(field.typ, depth);
        let mut line = if field.embedded || field.name.is_empty() {
            typ
        } else {
            format!("{} {}", field.name, typ)
        };
        if let Some(tag) = field.tag.as_deref().filter(|tag| !tag.is_empty()) {
            line.push_str(" `");
            line.push_str(tag);
            line.push('`');
        }
        line
    }
}

fn block(keyword: &str, lines: &[String]) -> String {
    if lines.is_empty() {
        return format!("{} {{}}", keyword);
    }

    let mut out = format!("{} {{\n", keyword);
    for line in lines {
        out.push_str(INDENT);
        out.push_str(line);
        out.push('\n');
    }
    out.push('}');
    out
}

fn inline(keyword: &str, lines: &[String]) -> String {
    if lines.is_empty() {
        format!("{} {{}}", keyword)
    } else {
        format!("{} {{ {} }}", keyword, lines.join("; "))
    }
}
