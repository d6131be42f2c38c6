//! Size-bounded chunking and summarization of raw diff text
//!
//! [`split`] packs per-file fragments into chunks no larger than a byte
//! budget, highest priority first. [`summarize`] builds the single-answer
//! text: the first chunk, a manifest of every changed path, and a note
//! counting the chunks left out.

/// Fragment tokenizer
pub mod parser;
/// Oversized fragment truncation
pub mod truncate;

pub use parser::{ChangeKind, DiffFragment, FragmentParser, parse_fragments};

use crate::classifier::{FileInfo, FileType, UNKNOWN_PRIORITY, classify_fragment_path};
use crate::error::{DiffError, Result};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use truncate::{clamp_to_char_boundary, truncate_fragment};

/// Summary text returned when the changeset is empty
pub const NO_CHANGES_MARKER: &str = "[no changes]";

const SECTION_BREAK: &str = "\n";

/// One fragment's contribution to a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPart {
    /// `None` for opaque text and for the fast-path chunk
    pub path: Option<String>,
    pub text: String,
    pub truncated: bool,
}

/// A size-bounded slice of the serialized diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffChunk {
    pub index: usize,
    pub parts: Vec<ChunkPart>,
}

impl DiffChunk {
    fn new(index: usize) -> Self {
        Self {
            index,
            parts: Vec::new(),
        }
    }

    /// Combined byte length of all parts
    pub fn len(&self) -> usize {
        self.parts.iter().map(|p| p.text.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Parts concatenated in order
    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.len());
        for part in &self.parts {
            out.push_str(&part.text);
        }
        out
    }
}

/// Result of single-answer summarization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSummary {
    /// Bounded text handed to the consumer
    pub text: String,
    /// Every chunk, kept as an audit trail
    pub chunks: Vec<DiffChunk>,
    /// Chunks not represented in `text`
    pub omitted_chunks: usize,
    /// The raw diff fit and was returned unchanged
    pub fast_path: bool,
}

impl DiffSummary {
    fn no_changes() -> Self {
        Self {
            text: NO_CHANGES_MARKER.to_string(),
            chunks: Vec::new(),
            omitted_chunks: 0,
            fast_path: false,
        }
    }
}

/// Line standing in for a binary file's content
pub fn binary_summary_line(path: &str, size_bytes: Option<u64>) -> String {
    match size_bytes {
        Some(size) => format!("{} ({} bytes) — binary, not shown", path, size),
        None => format!("{} — binary, not shown", path),
    }
}

/// Split a diff into chunks of at most `max_chunk_size` bytes
///
/// Priorities come from the fragment paths alone.
pub fn split(raw: &str, max_chunk_size: usize) -> Vec<DiffChunk> {
    split_with(raw, &[], max_chunk_size)
}

/// Split a diff, taking priorities, sizes and binary flags from `files`
/// where a fragment's path is listed there
pub fn split_with(raw: &str, files: &[FileInfo], max_chunk_size: usize) -> Vec<DiffChunk> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    let max_chunk_size = max_chunk_size.max(1);
    if raw.len() <= max_chunk_size {
        return vec![DiffChunk {
            index: 0,
            parts: vec![ChunkPart {
                path: None,
                text: raw.to_string(),
                truncated: false,
            }],
        }];
    }

    let known: HashMap<&str, &FileInfo> = files.iter().map(|f| (f.path.as_str(), f)).collect();
    let ranked = rank_fragments(raw, &known);

    let mut packer = Packer::new(max_chunk_size);
    let mut binaries = Vec::new();

    for item in &ranked {
        if item.is_binary {
            binaries.push(item);
            continue;
        }
        let truncated = item.fragment.text.len() > max_chunk_size;
        let text = if truncated {
            tracing::debug!(
                "Truncating {} ({} bytes) to {} bytes",
                item.fragment.path.as_deref().unwrap_or("<opaque>"),
                item.fragment.text.len(),
                max_chunk_size
            );
            truncate_fragment(&item.fragment, max_chunk_size)
        } else {
            item.fragment.text.to_string()
        };
        packer.push(ChunkPart {
            path: item.fragment.path.as_deref().map(str::to_string),
            text,
            truncated,
        });
    }

    // Binary lines never share a chunk with content
    packer.close();
    for item in binaries {
        let path = item.fragment.path.as_deref().unwrap_or_default();
        let mut line = binary_summary_line(path, item.size_bytes);
        line.push('\n');
        let truncated = line.len() > max_chunk_size;
        let text = clamp_to_char_boundary(&line, max_chunk_size).to_string();
        packer.push(ChunkPart {
            path: Some(path.to_string()),
            text,
            truncated,
        });
    }

    packer.finish()
}

struct RankedFragment<'a> {
    fragment: DiffFragment<'a>,
    priority: u32,
    size_bytes: Option<u64>,
    is_binary: bool,
}

/// Parse and order fragments by priority, ties by appearance
fn rank_fragments<'a>(raw: &'a str, known: &HashMap<&str, &FileInfo>) -> Vec<RankedFragment<'a>> {
    let mut ranked: Vec<RankedFragment<'a>> = FragmentParser::new(raw)
        .enumerate()
        .map(|(index, fragment)| {
            let (priority, size_bytes, is_binary) = match fragment.path.as_deref() {
                Some(path) => match known.get(path) {
                    Some(info) => (
                        info.priority,
                        info.size_bytes,
                        fragment.is_binary || info.file_type == FileType::Binary,
                    ),
                    None => {
                        let info = classify_fragment_path(path, fragment.is_binary, index);
                        (info.priority, None, fragment.is_binary)
                    }
                },
                None => (UNKNOWN_PRIORITY, None, false),
            };
            RankedFragment {
                fragment,
                priority,
                size_bytes,
                is_binary,
            }
        })
        .collect();
    ranked.sort_by_key(|r| Reverse(r.priority));
    ranked
}

/// Greedy first-fit packing into consecutive chunks
struct Packer {
    max: usize,
    current: DiffChunk,
    current_len: usize,
    done: Vec<DiffChunk>,
}

impl Packer {
    fn new(max: usize) -> Self {
        Self {
            max,
            current: DiffChunk::new(0),
            current_len: 0,
            done: Vec::new(),
        }
    }

    fn push(&mut self, part: ChunkPart) {
        if self.current_len + part.text.len() > self.max {
            self.close();
        }
        self.current_len += part.text.len();
        self.current.parts.push(part);
    }

    fn close(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let next = DiffChunk::new(self.done.len() + 1);
        self.done.push(std::mem::replace(&mut self.current, next));
        self.current_len = 0;
    }

    fn finish(mut self) -> Vec<DiffChunk> {
        self.close();
        self.done
    }
}

struct ManifestEntry {
    path: String,
    priority: u32,
    size_bytes: Option<u64>,
    is_binary: bool,
}

/// Every changed path once, highest priority first
fn manifest_entries(raw: &str, files: &[FileInfo]) -> Vec<ManifestEntry> {
    let mut seen = HashSet::new();
    let mut entries: Vec<ManifestEntry> = if files.is_empty() {
        FragmentParser::new(raw)
            .enumerate()
            .filter_map(|(index, fragment)| {
                let path = fragment.path?;
                let info = classify_fragment_path(&path, fragment.is_binary, index);
                Some(ManifestEntry {
                    path: info.path,
                    priority: info.priority,
                    size_bytes: None,
                    is_binary: fragment.is_binary,
                })
            })
            .collect()
    } else {
        files
            .iter()
            .map(|f| ManifestEntry {
                path: f.path.clone(),
                priority: f.priority,
                size_bytes: f.size_bytes,
                is_binary: f.is_binary,
            })
            .collect()
    };
    entries.retain(|e| seen.insert(e.path.clone()));
    entries.sort_by_key(|e| Reverse(e.priority));
    entries
}

fn render_manifest(entries: &[ManifestEntry], kinds: &HashMap<&str, ChangeKind>) -> String {
    let mut out = format!("Changed files ({}):\n", entries.len());
    for entry in entries {
        if entry.is_binary {
            out.push_str("- ");
            out.push_str(&binary_summary_line(&entry.path, entry.size_bytes));
            out.push('\n');
            continue;
        }
        match kinds.get(entry.path.as_str()) {
            Some(kind) => out.push_str(&format!("- {} [{}]\n", entry.path, kind)),
            None => out.push_str(&format!("- {}\n", entry.path)),
        }
    }
    out
}

fn omitted_note(count: usize) -> String {
    format!("[{} additional chunks omitted]\n", count)
}

/// Build the single-answer text for `raw` within `max_size` bytes
///
/// A diff that fits is returned unchanged. Otherwise the result is the first
/// chunk, the manifest, and a note counting the remaining chunks, all of which
/// are kept in [`DiffSummary::chunks`]. Fails only when the manifest and note
/// alone cannot fit.
pub fn summarize(raw: &str, files: &[FileInfo], max_size: usize) -> Result<DiffSummary> {
    if raw.trim().is_empty() && !files.is_empty() {
        // Paths were listed but their diff came back empty
        tracing::warn!(
            "Empty diff text for {} changed files, returning the manifest only",
            files.len()
        );
        let manifest = render_manifest(&manifest_entries(raw, files), &HashMap::new());
        if manifest.len() > max_size {
            return Err(DiffError::SizeBudgetUnsatisfiable {
                required: manifest.len(),
                budget: max_size,
            });
        }
        return Ok(DiffSummary {
            text: manifest,
            chunks: Vec::new(),
            omitted_chunks: 0,
            fast_path: false,
        });
    }

    if raw.trim().is_empty() {
        if NO_CHANGES_MARKER.len() > max_size {
            return Err(DiffError::SizeBudgetUnsatisfiable {
                required: NO_CHANGES_MARKER.len(),
                budget: max_size,
            });
        }
        return Ok(DiffSummary::no_changes());
    }

    if raw.len() <= max_size {
        return Ok(DiffSummary {
            text: raw.to_string(),
            chunks: split_with(raw, files, max_size),
            omitted_chunks: 0,
            fast_path: true,
        });
    }

    let fragments = parse_fragments(raw);
    let kinds: HashMap<&str, ChangeKind> = fragments
        .iter()
        .filter_map(|f| f.path.as_deref().map(|p| (p, f.change)))
        .collect();
    let manifest = render_manifest(&manifest_entries(raw, files), &kinds);

    // Chunk count is bounded by the number of parts, one per fragment
    let max_chunks = fragments.len() + files.len();
    let reserved_note = omitted_note(max_chunks).len();
    let minimal = manifest.len() + reserved_note + SECTION_BREAK.len();
    if minimal >= max_size {
        return Err(DiffError::SizeBudgetUnsatisfiable {
            required: minimal + 1,
            budget: max_size,
        });
    }

    let chunk_budget = max_size - minimal;
    let chunks = split_with(raw, files, chunk_budget);
    let omitted_chunks = chunks.len().saturating_sub(1);

    let mut text = chunks.first().map(DiffChunk::text).unwrap_or_default();
    text.push_str(SECTION_BREAK);
    text.push_str(&manifest);
    if omitted_chunks > 0 {
        text.push_str(&omitted_note(omitted_chunks));
    }

    tracing::info!(
        "Summarized {} bytes into {} bytes ({} chunks, {} omitted)",
        raw.len(),
        text.len(),
        chunks.len(),
        omitted_chunks
    );

    Ok(DiffSummary {
        text,
        chunks,
        omitted_chunks,
        fast_path: false,
    })
}
