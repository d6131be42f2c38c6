//! Changeset queries through a [`CommandRunner`], cached in a shared [`CacheStore`]

use crate::cache::{CacheStore, QueryKind, TtlPolicy, cache_key};
use crate::error::FetchError;
use crate::vcs::{CommandRunner, RetryPolicy};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Bytes read from the start of each changed file for binary sniffing
pub const HEAD_SNIFF_BYTES: usize = 1024;

/// Default timeout for name and identity queries
pub const DEFAULT_LIGHT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout for diff body queries
pub const DEFAULT_HEAVY_TIMEOUT: Duration = Duration::from_secs(30);

/// File probes in flight at once; results keep VCS order
const PROBE_CONCURRENCY: usize = 16;

/// Which pending changes a retrieval covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffScope {
    #[default]
    Staged,
    Unstaged,
    Both,
}

/// One of the underlying diff queries a scope is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopePart {
    Unstaged,
    Staged,
}

impl DiffScope {
    /// Underlying queries in output order; `Both` is unstaged then staged
    pub fn parts(self) -> &'static [ScopePart] {
        match self {
            DiffScope::Staged => &[ScopePart::Staged],
            DiffScope::Unstaged => &[ScopePart::Unstaged],
            DiffScope::Both => &[ScopePart::Unstaged, ScopePart::Staged],
        }
    }
}

impl fmt::Display for DiffScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiffScope::Staged => "staged",
            DiffScope::Unstaged => "unstaged",
            DiffScope::Both => "both",
        };
        f.write_str(name)
    }
}

impl FromStr for DiffScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "staged" | "cached" => Ok(DiffScope::Staged),
            "unstaged" | "worktree" => Ok(DiffScope::Unstaged),
            "both" | "all" => Ok(DiffScope::Both),
            other => Err(format!(
                "unknown scope '{}', expected staged, unstaged or both",
                other
            )),
        }
    }
}

impl ScopePart {
    /// Base arguments of every query on this part
    ///
    /// Renames are reported as a deletion plus an addition, so the name list
    /// covers both paths and any path filter selects each side on its own.
    fn diff_args(self) -> Vec<String> {
        let mut args = vec!["diff".to_string()];
        if self == ScopePart::Staged {
            args.push("--cached".to_string());
        }
        args.push("--no-renames".to_string());
        args
    }
}

/// What the fetcher learned about one changed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    /// Path relative to the repository root, as the VCS reports it
    pub path: String,
    /// Size on disk, `None` when the file no longer exists
    pub size_bytes: Option<u64>,
    /// First [`HEAD_SNIFF_BYTES`] bytes, `None` when the file no longer exists
    pub head: Option<Vec<u8>>,
}

impl ChangedFile {
    pub fn new(path: impl Into<String>, size_bytes: Option<u64>, head: Option<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            head,
        }
    }
}

/// Cached adapter over the VCS runner
///
/// Cloning is cheap; clones share the runner and the cache.
#[derive(Clone)]
pub struct DiffFetcher {
    runner: Arc<dyn CommandRunner>,
    cache: Arc<CacheStore<String>>,
    ttl: TtlPolicy,
    retry: RetryPolicy,
    light_timeout: Duration,
    heavy_timeout: Duration,
}

impl fmt::Debug for DiffFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffFetcher")
            .field("ttl", &self.ttl)
            .field("retry", &self.retry)
            .field("light_timeout", &self.light_timeout)
            .field("heavy_timeout", &self.heavy_timeout)
            .finish_non_exhaustive()
    }
}

impl DiffFetcher {
    pub fn new(runner: Arc<dyn CommandRunner>, cache: Arc<CacheStore<String>>) -> Self {
        Self {
            runner,
            cache,
            ttl: TtlPolicy::default(),
            retry: RetryPolicy::default(),
            light_timeout: DEFAULT_LIGHT_TIMEOUT,
            heavy_timeout: DEFAULT_HEAVY_TIMEOUT,
        }
    }

    pub fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the light (names, identity) and heavy (diff bodies) timeouts
    pub fn with_timeouts(mut self, light: Duration, heavy: Duration) -> Self {
        self.light_timeout = light;
        self.heavy_timeout = heavy;
        self
    }

    pub fn cache(&self) -> &Arc<CacheStore<String>> {
        &self.cache
    }

    /// Run one query, answering from the cache when an unexpired entry exists
    async fn query(
        &self,
        kind: QueryKind,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let key = cache_key("git", &args);
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!("Cache hit for {}", key);
            return Ok(hit);
        }

        let runner = self.runner.as_ref();
        let args_ref: &[String] = &args;
        let output = self.retry.run(|| runner.run(args_ref, timeout)).await?;

        self.cache.set(key, output.clone(), self.ttl.ttl_for(kind));
        Ok(output)
    }

    /// Raw diff text for a scope, unmodified apart from lossy UTF-8 decoding
    pub async fn fetch_diff(&self, scope: DiffScope) -> Result<String, FetchError> {
        let mut raw = String::new();
        for part in scope.parts() {
            let text = self.fetch_part_diff(*part).await?;
            raw.push_str(&text);
        }
        tracing::debug!("Fetched {} bytes of {} diff", raw.len(), scope);
        Ok(raw)
    }

    /// Raw diff text of one scope part
    pub async fn fetch_part_diff(&self, part: ScopePart) -> Result<String, FetchError> {
        self.query(QueryKind::WorkingTree, part.diff_args(), self.heavy_timeout)
            .await
    }

    /// Diff of one scope part restricted to a batch of paths
    pub async fn fetch_paths_diff(
        &self,
        part: ScopePart,
        paths: &[String],
    ) -> Result<String, FetchError> {
        if paths.is_empty() {
            return Ok(String::new());
        }
        let mut args = part.diff_args();
        args.push("--".to_string());
        args.extend(paths.iter().cloned());
        self.query(QueryKind::WorkingTree, args, self.heavy_timeout)
            .await
    }

    /// Changed paths of one scope part, in VCS order
    ///
    /// Names are NUL-terminated (`-z`) so they arrive verbatim, never quoted.
    pub async fn part_changed_files(&self, part: ScopePart) -> Result<Vec<String>, FetchError> {
        let mut args = part.diff_args();
        args.push("--name-only".to_string());
        args.push("-z".to_string());
        let output = self
            .query(QueryKind::WorkingTree, args, self.light_timeout)
            .await?;
        Ok(output
            .split('\0')
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Changed paths for a scope in VCS order; `Both` lists unstaged first and
    /// reports each path once
    pub async fn changed_files(&self, scope: DiffScope) -> Result<Vec<String>, FetchError> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for part in scope.parts() {
            for path in self.part_changed_files(*part).await? {
                if seen.insert(path.clone()) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    /// Changed paths plus on-disk size and a head sample for sniffing
    pub async fn probe_changed_files(
        &self,
        scope: DiffScope,
    ) -> Result<Vec<ChangedFile>, FetchError> {
        let paths = self.changed_files(scope).await?;
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let root = PathBuf::from(self.repo_root().await?);

        let root = &root;
        let probed = stream::iter(paths)
            .map(|path| async move {
                let (size_bytes, head) = probe_file(&root.join(&path)).await;
                ChangedFile {
                    path,
                    size_bytes,
                    head,
                }
            })
            .buffered(PROBE_CONCURRENCY)
            .collect()
            .await;
        Ok(probed)
    }

    /// Absolute path of the repository's top-level directory
    pub async fn repo_root(&self) -> Result<String, FetchError> {
        let args = vec!["rev-parse".to_string(), "--show-toplevel".to_string()];
        let output = self
            .query(QueryKind::Identity, args, self.light_timeout)
            .await?;
        Ok(output.trim().to_string())
    }

    /// Name of the checked-out branch (`HEAD` when detached)
    pub async fn current_branch(&self) -> Result<String, FetchError> {
        let args = vec![
            "rev-parse".to_string(),
            "--abbrev-ref".to_string(),
            "HEAD".to_string(),
        ];
        let output = self
            .query(QueryKind::Identity, args, self.light_timeout)
            .await?;
        Ok(output.trim().to_string())
    }
}

/// Size and head sample of a file, both `None` if it cannot be read
async fn probe_file(path: &Path) -> (Option<u64>, Option<Vec<u8>>) {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return (None, None),
    };

    let head = match tokio::fs::File::open(path).await {
        Ok(file) => {
            let mut buf = Vec::with_capacity(HEAD_SNIFF_BYTES);
            match file.take(HEAD_SNIFF_BYTES as u64).read_to_end(&mut buf).await {
                Ok(_) => Some(buf),
                Err(e) => {
                    tracing::debug!("Failed to read head of {}: {}", path.display(), e);
                    None
                }
            }
        }
        Err(_) => None,
    };

    (Some(size), head)
}
