//! File type and priority tagging for changed files
//!
//! Classification uses the extension first and falls back to sniffing the
//! head of the file for a NUL byte. Priorities only order content; they never
//! cause a path to be dropped.

use crate::fetcher::ChangedFile;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub const TEXT_PRIORITY: u32 = 100;
pub const CONFIG_PRIORITY: u32 = 80;
pub const UNKNOWN_PRIORITY: u32 = 50;
pub const BINARY_PRIORITY: u32 = 20;

/// Boost for project documentation (readme, license, changelog)
pub const DOC_BOOST: u32 = 20;
/// Boost for test code
pub const TEST_BOOST: u32 = 10;

const DOC_KEYWORDS: &[&str] = &["readme", "license", "changelog"];
const TEST_KEYWORDS: &[&str] = &["test", "spec"];

/// Coarse content category of a changed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Text,
    Config,
    Binary,
    Unknown,
}

impl FileType {
    /// Base priority before path boosts
    pub fn base_priority(self) -> u32 {
        match self {
            FileType::Text => TEXT_PRIORITY,
            FileType::Config => CONFIG_PRIORITY,
            FileType::Unknown => UNKNOWN_PRIORITY,
            FileType::Binary => BINARY_PRIORITY,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::Text => "text",
            FileType::Config => "config",
            FileType::Binary => "binary",
            FileType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Classification of one changed file, derived fresh per retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub size_bytes: Option<u64>,
    pub file_type: FileType,
    pub priority: u32,
    /// Sniff outcome for `Unknown` files; always true for `Binary`
    pub is_binary: bool,
    /// Position in the VCS-reported list
    pub vcs_index: usize,
}

/// Map an extension to a type, `None` when it is in no fixed set
pub fn type_for_extension(extension: &str) -> Option<FileType> {
    let file_type = match extension.to_lowercase().as_str() {
        // Source code
        "rs" | "py" | "pyi" | "js" | "mjs" | "cjs" | "ts" | "jsx" | "tsx" | "java" | "cpp"
        | "cc" | "cxx" | "c" | "h" | "hpp" | "go" | "rb" | "php" | "swift" | "kt" | "kts"
        | "scala" | "sh" | "bash" | "zsh" | "sql" | "cs" | "dart" | "lua" | "pl" | "r"
        | "ex" | "exs" | "hs" | "vue" | "svelte" => FileType::Text,

        // Markup and documentation
        "html" | "htm" | "css" | "scss" | "sass" | "md" | "markdown" | "rst" | "adoc"
        | "asciidoc" | "org" | "txt" | "svg" => FileType::Text,

        // Data formats and config files
        "json" | "yaml" | "yml" | "toml" | "xml" | "ini" | "conf" | "config" | "cfg"
        | "properties" | "env" | "lock" | "gradle" => FileType::Config,

        // Images, archives, compiled artifacts, media
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "ico" | "webp" | "tiff" | "psd" | "pdf"
        | "zip" | "tar" | "gz" | "tgz" | "bz2" | "xz" | "7z" | "rar" | "jar" | "war" | "exe"
        | "dll" | "so" | "dylib" | "a" | "o" | "class" | "pyc" | "wasm" | "bin" | "dat"
        | "woff" | "woff2" | "ttf" | "otf" | "eot" | "mp3" | "mp4" | "wav" | "ogg" | "flac"
        | "avi" | "mov" | "mkv" | "sqlite" | "db" => FileType::Binary,

        _ => return None,
    };
    Some(file_type)
}

/// Whether a sampled head looks binary (contains a NUL byte)
pub fn sniff_is_binary(head: &[u8]) -> bool {
    head.contains(&0)
}

/// Sum of keyword boosts for a path
pub fn path_boost(path: &str) -> u32 {
    let lower = path.to_lowercase();
    let mut boost = 0;
    if DOC_KEYWORDS.iter().any(|k| lower.contains(k)) {
        boost += DOC_BOOST;
    }
    if TEST_KEYWORDS.iter().any(|k| lower.contains(k)) {
        boost += TEST_BOOST;
    }
    boost
}

fn extension_type(path: &str) -> Option<FileType> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(type_for_extension)
}

fn classify_one(file: &ChangedFile, vcs_index: usize) -> FileInfo {
    let (file_type, is_binary) = match extension_type(&file.path) {
        Some(FileType::Binary) => (FileType::Binary, true),
        Some(other) => (other, false),
        None => {
            let is_binary = file.head.as_deref().is_some_and(sniff_is_binary);
            (FileType::Unknown, is_binary)
        }
    };

    FileInfo {
        path: file.path.clone(),
        size_bytes: file.size_bytes,
        file_type,
        priority: file_type.base_priority() + path_boost(&file.path),
        is_binary,
        vcs_index,
    }
}

/// Classify changed files, highest priority first
///
/// Ties keep VCS order, so the output is deterministic for a fixed input.
pub fn classify(files: &[ChangedFile]) -> Vec<FileInfo> {
    let mut infos: Vec<FileInfo> = files
        .par_iter()
        .enumerate()
        .map(|(index, file)| classify_one(file, index))
        .collect();
    infos.sort_by_key(|info| Reverse(info.priority));
    infos
}

/// Classify a path known only from diff text (no size, no head sample)
///
/// `is_binary` comes from the diff itself (a binary patch or a
/// "Binary files differ" line).
pub fn classify_fragment_path(path: &str, is_binary: bool, vcs_index: usize) -> FileInfo {
    let file_type = match extension_type(path) {
        Some(file_type) => file_type,
        None if is_binary => FileType::Binary,
        None => FileType::Unknown,
    };
    FileInfo {
        path: path.to_string(),
        size_bytes: None,
        file_type,
        priority: file_type.base_priority() + path_boost(path),
        is_binary: is_binary || file_type == FileType::Binary,
        vcs_index,
    }
}

/// Count files per type
pub fn type_counts(files: &[FileInfo]) -> BTreeMap<FileType, usize> {
    let mut counts = BTreeMap::new();
    for file in files {
        *counts.entry(file.file_type).or_insert(0) += 1;
    }
    counts
}
