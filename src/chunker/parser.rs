//! Single-pass tokenizer splitting raw diff text into per-file fragments
//!
//! Fragments borrow from the input; only C-quoted paths are decoded into owned
//! strings. Text that does not start with a file header (a preamble, or garbage)
//! comes out as an opaque fragment so it is passed through rather than lost.

use std::borrow::Cow;
use std::fmt;

/// Prefix of the line that opens every per-file section
pub const FILE_HEADER_PREFIX: &str = "diff --git ";

/// What happened to a file in the changeset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
    Renamed,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Modified => "modified",
            ChangeKind::Renamed => "renamed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The diff text of one changed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffFragment<'a> {
    /// Full fragment text, header included
    pub text: &'a str,
    /// `diff --git` line plus extended header lines (`index`, `---`, `+++`, ...)
    pub header: &'a str,
    /// Hunks or binary payload following the header
    pub body: &'a str,
    /// Decoded path; owned only when git printed it C-quoted
    pub path: Option<Cow<'a, str>>,
    /// Source path of a rename
    pub old_path: Option<Cow<'a, str>>,
    pub change: ChangeKind,
    pub is_binary: bool,
    /// False for opaque text and for headers whose path could not be read
    pub well_formed: bool,
}

impl<'a> DiffFragment<'a> {
    /// Parse one fragment; never fails
    pub fn parse(text: &'a str) -> Self {
        if !text.starts_with(FILE_HEADER_PREFIX) {
            return Self::opaque(text);
        }

        let mut header_end = text.len();
        let mut offset = 0;
        let mut change = ChangeKind::Modified;
        let mut minus_path = None;
        let mut plus_path = None;
        let mut rename_from = None;
        let mut rename_to = None;
        let mut is_binary = false;

        for (i, line) in text.split_inclusive('\n').enumerate() {
            let trimmed = line.trim_end();
            if i > 0 && is_body_start(trimmed) {
                header_end = offset;
                is_binary = trimmed.starts_with("GIT binary patch")
                    || (trimmed.starts_with("Binary files ") && trimmed.ends_with(" differ"));
                break;
            }
            offset += line.len();

            if trimmed.starts_with("new file mode") {
                change = ChangeKind::Added;
            } else if trimmed.starts_with("deleted file mode") {
                change = ChangeKind::Deleted;
            } else if let Some(from) = trimmed.strip_prefix("rename from ") {
                rename_from = Some(unquote_path(from));
                change = ChangeKind::Renamed;
            } else if let Some(to) = trimmed.strip_prefix("rename to ") {
                rename_to = Some(unquote_path(to));
                change = ChangeKind::Renamed;
            } else if let Some(old) = trimmed.strip_prefix("--- ") {
                minus_path = side_path(old, "a/");
            } else if let Some(new) = trimmed.strip_prefix("+++ ") {
                plus_path = side_path(new, "b/");
            }
        }

        let first_line = text.lines().next().unwrap_or_default();
        let (header_old, header_new) = match parse_header_paths(first_line) {
            Some((old, new)) => (Some(old), Some(new)),
            None => (None, None),
        };

        let path = match change {
            ChangeKind::Deleted => minus_path.clone().or_else(|| header_old.clone()),
            _ => plus_path.or(rename_to).or(header_new),
        };
        let old_path = match change {
            ChangeKind::Renamed => rename_from.or(minus_path).or(header_old),
            _ => None,
        };

        let (header, body) = text.split_at(header_end);
        let well_formed = path.is_some();
        Self {
            text,
            header,
            body,
            path,
            old_path,
            change,
            is_binary,
            well_formed,
        }
    }

    fn opaque(text: &'a str) -> Self {
        Self {
            text,
            header: "",
            body: text,
            path: None,
            old_path: None,
            change: ChangeKind::Modified,
            is_binary: false,
            well_formed: false,
        }
    }

    /// The `diff --git` line (or first line of opaque text), newline included
    pub fn first_line(&self) -> &'a str {
        self.text.split_inclusive('\n').next().unwrap_or_default()
    }
}

fn is_body_start(line: &str) -> bool {
    line.starts_with("@@")
        || line.starts_with("GIT binary patch")
        || line.starts_with("Binary files ")
}

/// Decode a path git printed C-quoted, e.g. `"caf\303\251.rs"`
///
/// Unquoted input is borrowed unchanged. Octal escapes are raw bytes, so a
/// multi-byte character arrives as several of them.
pub fn unquote_path(raw: &str) -> Cow<'_, str> {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return Cow::Borrowed(raw);
    };

    let src = inner.as_bytes();
    let mut bytes = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        if src[i] != b'\\' || i + 1 == src.len() {
            bytes.push(src[i]);
            i += 1;
            continue;
        }
        let escape = src[i + 1];
        i += 2;
        let decoded = match escape {
            b'a' => 0x07,
            b'b' => 0x08,
            b't' => b'\t',
            b'n' => b'\n',
            b'v' => 0x0b,
            b'f' => 0x0c,
            b'r' => b'\r',
            b'0'..=b'3' if is_octal_pair(&src[i..]) => {
                let value = (escape - b'0') * 64 + (src[i] - b'0') * 8 + (src[i + 1] - b'0');
                i += 2;
                value
            }
            other => other,
        };
        bytes.push(decoded);
    }
    Cow::Owned(String::from_utf8_lossy(&bytes).into_owned())
}

fn is_octal_pair(rest: &[u8]) -> bool {
    matches!(rest, [b'0'..=b'7', b'0'..=b'7', ..])
}

/// `Ok` with `prefix` removed, or `Err` with the path untouched
fn strip_path_prefix<'a>(path: Cow<'a, str>, prefix: &str) -> Result<Cow<'a, str>, Cow<'a, str>> {
    match path {
        Cow::Borrowed(s) => s.strip_prefix(prefix).map(Cow::Borrowed).ok_or(Cow::Borrowed(s)),
        Cow::Owned(s) => {
            if s.starts_with(prefix) {
                Ok(Cow::Owned(s[prefix.len()..].to_string()))
            } else {
                Err(Cow::Owned(s))
            }
        }
    }
}

/// Path of a `---`/`+++` line without its `a/` or `b/`; `/dev/null` means no path
fn side_path<'a>(value: &'a str, prefix: &str) -> Option<Cow<'a, str>> {
    let value = value.trim_end_matches('\t');
    if value == "/dev/null" {
        return None;
    }
    Some(strip_path_prefix(unquote_path(value), prefix).unwrap_or_else(|path| path))
}

/// Read `(old, new)` from `diff --git a/<old> b/<new>`
///
/// Identical paths are split at the midpoint, so paths that themselves
/// contain " b/" still parse when the file was not renamed. Either side may
/// be C-quoted.
fn parse_header_paths(line: &str) -> Option<(Cow<'_, str>, Cow<'_, str>)> {
    let rest = line.strip_prefix(FILE_HEADER_PREFIX)?.trim_end();
    if rest.starts_with('"') || rest.ends_with('"') {
        let (old, new) = split_quoted_header(rest)?;
        let old = strip_path_prefix(unquote_path(old), "a/").ok()?;
        let new = strip_path_prefix(unquote_path(new), "b/").ok()?;
        return Some((old, new));
    }
    if !rest.starts_with("a/") {
        return None;
    }

    if rest.len() % 2 == 1 {
        let mid = rest.len() / 2;
        if let (Some(left), Some(right)) = (rest.get(..mid), rest.get(mid + 1..))
            && rest.as_bytes()[mid] == b' '
            && right.starts_with("b/")
            && left[2..] == right[2..]
        {
            return Some((Cow::Borrowed(&left[2..]), Cow::Borrowed(&right[2..])));
        }
    }

    let split = rest.find(" b/")?;
    Some((Cow::Borrowed(&rest[2..split]), Cow::Borrowed(&rest[split + 3..])))
}

/// Split a header where at least one side is quoted into its two raw tokens
fn split_quoted_header(rest: &str) -> Option<(&str, &str)> {
    if rest.starts_with('"') {
        let bytes = rest.as_bytes();
        let mut i = 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'"' => {
                    let new = rest[i + 1..].strip_prefix(' ')?;
                    return Some((&rest[..=i], new));
                }
                _ => i += 1,
            }
        }
        return None;
    }
    let split = rest.rfind(" \"")?;
    Some((&rest[..split], &rest[split + 1..]))
}

/// Iterator over the fragments of a raw diff, in appearance order
#[derive(Debug, Clone)]
pub struct FragmentParser<'a> {
    rest: &'a str,
}

impl<'a> FragmentParser<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self { rest: raw }
    }
}

impl<'a> Iterator for FragmentParser<'a> {
    type Item = DiffFragment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let end = next_fragment_end(self.rest);
        let (text, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(DiffFragment::parse(text))
    }
}

/// Byte offset of the next file header after the first line
fn next_fragment_end(text: &str) -> usize {
    let mut offset = 0;
    for (i, line) in text.split_inclusive('\n').enumerate() {
        if i > 0 && line.starts_with(FILE_HEADER_PREFIX) {
            return offset;
        }
        offset += line.len();
    }
    text.len()
}

/// Parse every fragment of `raw`
pub fn parse_fragments(raw: &str) -> Vec<DiffFragment<'_>> {
    FragmentParser::new(raw).collect()
}
