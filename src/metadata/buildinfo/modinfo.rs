//! Module information text parsing.
//!
//! The linker embeds the output of `go version -m` as a text block framed by two 16-byte
//! sentinels. Each line is tab separated:
//!
//! ```text
//! path    example.com/cmd/server
//! mod     example.com/cmd/server  (devel)
//! dep     golang.org/x/sys        v0.13.0  h1:...
//! =>      ../sys                  (devel)
//! build   -ldflags="-s -w"
//! ```

use super::{BuildInfo, Module, Setting};
use crate::{Error, Result};

/// Sentinel preceding the module information.
pub const START_SENTINEL: [u8; 16] = [
    0x30, 0x77, 0xaf, 0x0c, 0x92, 0x74, 0x08, 0x02, 0x41, 0xe1, 0xc1, 0x07, 0xe6, 0xd6, 0x18, 0xe6,
];

/// Sentinel following the module information.
pub const END_SENTINEL: [u8; 16] = [
    0xf9, 0x32, 0x43, 0x31, 0x86, 0x18, 0x20, 0x72, 0x00, 0x82, 0x42, 0x10, 0x41, 0x16, 0xd8, 0xf2,
];

/// Removes the sentinels around a module information blob.
///
/// Returns the inner text and whether the blob was cut short (start sentinel without a matching
/// end).
#[must_use]
pub fn strip_sentinels(raw: &[u8]) -> (&[u8], bool) {
    if raw.len() >= 33 && raw[raw.len() - 17] == b'\n' {
        return (&raw[16..raw.len() - 16], false);
    }

    if raw.starts_with(&START_SENTINEL) {
        return (&raw[16..], true);
    }

    (raw, false)
}

/// Line-oriented parser filling a [`BuildInfo`].
///
/// Parsing stops at the first malformed line; everything decoded before it stays in the
/// [`BuildInfo`].
pub struct ModInfoParser<'a> {
    info: &'a mut BuildInfo,
    /// Module the next `=>` line applies to
    last: Option<LastModule>,
}

#[derive(Clone, Copy)]
enum LastModule {
    Main,
    Dep(usize),
}

impl<'a> ModInfoParser<'a> {
    /// Creates a parser appending to `info`.
    pub fn new(info: &'a mut BuildInfo) -> Self {
        ModInfoParser { info, last: None }
    }

    /// Parses the module information text.
    ///
    /// # Errors
    /// Returns [`crate::Error::BuildInfoTruncated`] at the first line with an unexpected shape.
    pub fn parse(&mut self, text: &str) -> Result<()> {
        for line in text.split('\n') {
            if line.is_empty() {
                continue;
            }
            self.parse_line(line)?;
        }
        Ok(())
    }

    fn parse_line(&mut self, line: &str) -> Result<()> {
        if let Some(path) = line.strip_prefix("path\t") {
            self.info.path = path.to_string();
        } else if let Some(rest) = line.strip_prefix("mod\t") {
            self.info.main = module(rest, line)?;
            self.last = Some(LastModule::Main);
        } else if let Some(rest) = line.strip_prefix("dep\t") {
            self.info.deps.push(module(rest, line)?);
            self.last = Some(LastModule::Dep(self.info.deps.len() - 1));
        } else if let Some(rest) = line.strip_prefix("=>\t") {
            let columns: Vec<&str> = rest.split('\t').collect();
            if columns.len() != 3 {
                return Err(truncated(line, "expected 3 columns for replacement"));
            }
            let replacement = Box::new(Module {
                path: columns[0].to_string(),
                version: columns[1].to_string(),
                sum: columns[2].to_string(),
                replace: None,
            });

            let target = match self.last.take() {
                Some(LastModule::Main) => &mut self.info.main,
                Some(LastModule::Dep(index)) => &mut self.info.deps[index],
                None => return Err(truncated(line, "replacement with no module before it")),
            };
            target.replace = Some(replacement);
        } else if let Some(rest) = line.strip_prefix("build\t") {
            self.info.settings.push(setting(rest, line)?);
        } else {
            log::debug!("Ignoring unknown module information line {:?}", line);
        }

        Ok(())
    }
}

fn truncated(line: &str, reason: &str) -> Error {
    Error::BuildInfoTruncated(format!("{} in line {:?}", reason, line))
}

fn module(rest: &str, line: &str) -> Result<Module> {
    let columns: Vec<&str> = rest.split('\t').collect();
    if columns.len() != 2 && columns.len() != 3 {
        return Err(truncated(line, "expected 2 or 3 columns"));
    }

    Ok(Module {
        path: columns[0].to_string(),
        version: columns[1].to_string(),
        sum: columns.get(2).map(ToString::to_string).unwrap_or_default(),
        replace: None,
    })
}

fn setting(rest: &str, line: &str) -> Result<Setting> {
    if rest.is_empty() {
        return Err(truncated(line, "empty build setting"));
    }

    let (key, raw_value) = if rest.starts_with('"') {
        let (key, consumed) =
            unquote_prefix(rest).ok_or_else(|| truncated(line, "bad quoted key"))?;
        let remainder = &rest[consumed..];
        let raw_value = remainder
            .strip_prefix('=')
            .ok_or_else(|| truncated(line, "missing '=' after key"))?;
        (key, raw_value)
    } else {
        let (key, raw_value) = rest
            .split_once('=')
            .ok_or_else(|| truncated(line, "missing '=' in build setting"))?;
        (key.to_string(), raw_value)
    };

    let value = if raw_value.starts_with('"') || raw_value.starts_with('`') {
        match unquote_prefix(raw_value) {
            Some((value, consumed)) if consumed == raw_value.len() => value,
            _ => return Err(truncated(line, "bad quoted value")),
        }
    } else {
        raw_value.to_string()
    };

    Ok(Setting { key, value })
}

/// Decodes a Go-quoted string at the start of `input`.
///
/// Returns the decoded text and the number of input bytes consumed, or `None` if the literal
/// is unterminated or contains an invalid escape.
fn unquote_prefix(input: &str) -> Option<(String, usize)> {
    let mut chars = input.char_indices();
    let (_, quote) = chars.next()?;

    if quote == '`' {
        let end = input[1..].find('`')?;
        return Some((input[1..=end].to_string(), end + 2));
    }
    if quote != '"' {
        return None;
    }

    let mut out = String::new();
    while let Some((index, c)) = chars.next() {
        match c {
            '"' => return Some((out, index + 1)),
            '\\' => {
                let (_, escape) = chars.next()?;
                match escape {
                    'a' => out.push('\u{07}'),
                    'b' => out.push('\u{08}'),
                    'f' => out.push('\u{0C}'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'v' => out.push('\u{0B}'),
                    '\\' => out.push('\\'),
                    '"' => out.push('"'),
                    '\'' => out.push('\''),
                    'x' | 'u' | 'U' => {
                        let digits = match escape {
                            'x' => 2,
                            'u' => 4,
                            _ => 8,
                        };
                        let mut code = 0u32;
                        for _ in 0..digits {
                            let (_, digit) = chars.next()?;
                            code = code * 16 + digit.to_digit(16)?;
                        }
                        out.push(char::from_u32(code)?);
                    }
                    '0'..='7' => {
                        let mut code = escape.to_digit(8)?;
                        for _ in 0..2 {
                            let (_, digit) = chars.next()?;
                            code = code * 8 + digit.to_digit(8)?;
                        }
                        out.push(char::from_u32(code)?);
                    }
                    _ => return None,
                }
            }
            '\n' => return None,
            _ => out.push(c),
        }
    }

    None
}
