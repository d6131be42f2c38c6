//! Strategy selection and execution for a single diff resolution
//!
//! The dispatcher profiles the changed files, picks one of three strategies
//! and returns the bounded summary. All strategies produce the same ordering:
//! priority first, then VCS order.

use crate::chunker::{DiffSummary, FragmentParser, summarize};
use crate::classifier::{FileInfo, FileType, classify, type_counts};
use crate::config::DispatchConfig;
use crate::error::{DiffError, FetchError, Result};
use crate::fetcher::{DiffFetcher, DiffScope, ScopePart};
use crate::instrumentation::Metrics;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Processing strategy for one resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Fetch the whole diff at once
    Sequential,
    /// Fetch priority-ordered batches, stopping once the budget is reached
    Incremental,
    /// Fetch contiguous sub-batches concurrently
    Parallel,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Sequential => "sequential",
            Strategy::Incremental => "incremental",
            Strategy::Parallel => "parallel",
        };
        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(Strategy::Sequential),
            "incremental" => Ok(Strategy::Incremental),
            "parallel" => Ok(Strategy::Parallel),
            other => Err(format!(
                "unknown strategy '{}', expected sequential, incremental or parallel",
                other
            )),
        }
    }
}

/// Workload estimate for one resolution, never cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryProfile {
    pub total_size_bytes: u64,
    pub file_count: usize,
    pub type_counts: BTreeMap<FileType, usize>,
    pub recommended_worker_count: usize,
}

impl RepositoryProfile {
    /// Profile classified files; workers are capped by `max_workers`, the
    /// machine's parallelism and the file count
    pub fn build(files: &[FileInfo], max_workers: usize) -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let recommended_worker_count = max_workers.min(available).min(files.len()).max(1);
        Self {
            total_size_bytes: files.iter().filter_map(|f| f.size_bytes).sum(),
            file_count: files.len(),
            type_counts: type_counts(files),
            recommended_worker_count,
        }
    }
}

/// Per-invocation overrides of the configured dispatch settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Byte budget of the returned text
    pub max_size: usize,
    /// Force a strategy instead of choosing from the profile
    pub strategy: Option<Strategy>,
    pub sequential_max_bytes: Option<u64>,
    pub parallel_min_bytes: Option<u64>,
    pub batch_size: Option<usize>,
    pub max_workers: Option<usize>,
}

impl ResolveOptions {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn with_thresholds(mut self, sequential_max_bytes: u64, parallel_min_bytes: u64) -> Self {
        self.sequential_max_bytes = Some(sequential_max_bytes);
        self.parallel_min_bytes = Some(parallel_min_bytes);
        self
    }

    /// Configured settings with this invocation's overrides applied
    fn effective(&self, base: &DispatchConfig) -> DispatchConfig {
        DispatchConfig {
            strategy: self.strategy.or(base.strategy),
            sequential_max_bytes: self.sequential_max_bytes.unwrap_or(base.sequential_max_bytes),
            parallel_min_bytes: self.parallel_min_bytes.unwrap_or(base.parallel_min_bytes),
            batch_size: self.batch_size.unwrap_or(base.batch_size).max(1),
            max_workers: self.max_workers.unwrap_or(base.max_workers).max(1),
        }
    }
}

/// Pick a strategy from a profile
pub fn choose_strategy(profile: &RepositoryProfile, settings: &DispatchConfig) -> Strategy {
    if profile.total_size_bytes < settings.sequential_max_bytes {
        Strategy::Sequential
    } else if profile.total_size_bytes >= settings.parallel_min_bytes
        && profile.recommended_worker_count >= 2
    {
        Strategy::Parallel
    } else {
        Strategy::Incremental
    }
}

/// Await `fut`, giving up as soon as `cancel` fires
async fn or_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = std::result::Result<T, FetchError>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiffError::Cancelled),
        result = fut => Ok(result?),
    }
}

fn check_cancelled(cancel: &CancellationToken, stage: &str) -> Result<()> {
    if cancel.is_cancelled() {
        tracing::info!("Diff resolution cancelled {}", stage);
        return Err(DiffError::Cancelled);
    }
    Ok(())
}

/// Diff text of one path batch for every part of a scope
async fn fetch_batch(
    fetcher: &DiffFetcher,
    parts: &[ScopePart],
    paths: &[String],
) -> std::result::Result<Vec<(ScopePart, String)>, FetchError> {
    let mut texts = Vec::with_capacity(parts.len());
    for part in parts {
        texts.push((*part, fetcher.fetch_paths_diff(*part, paths).await?));
    }
    Ok(texts)
}

/// Chooses and runs a strategy for each resolution
#[derive(Debug, Clone)]
pub struct AdaptiveDispatcher {
    fetcher: DiffFetcher,
    settings: DispatchConfig,
    metrics: Arc<Metrics>,
}

impl AdaptiveDispatcher {
    pub fn new(fetcher: DiffFetcher, settings: DispatchConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            fetcher,
            settings,
            metrics,
        }
    }

    pub fn fetcher(&self) -> &DiffFetcher {
        &self.fetcher
    }

    /// Profile, pick a strategy, fetch and summarize
    pub async fn resolve(
        &self,
        scope: DiffScope,
        options: &ResolveOptions,
        cancel: &CancellationToken,
    ) -> Result<DiffSummary> {
        let settings = options.effective(&self.settings);
        check_cancelled(cancel, "before profiling")?;

        let changed = or_cancel(cancel, self.fetcher.probe_changed_files(scope)).await?;
        let files = classify(&changed);
        let profile = RepositoryProfile::build(&files, settings.max_workers);

        let strategy = settings
            .strategy
            .unwrap_or_else(|| choose_strategy(&profile, &settings));
        tracing::info!(
            "Resolving {} diff: {} files, {} bytes, strategy {}",
            scope,
            profile.file_count,
            profile.total_size_bytes,
            strategy
        );
        check_cancelled(cancel, "after profiling")?;

        let raw = match strategy {
            Strategy::Sequential => self.run_sequential(scope, cancel).await?,
            Strategy::Incremental => {
                self.run_incremental(scope, &files, options.max_size, settings.batch_size, cancel)
                    .await?
            }
            Strategy::Parallel => {
                self.run_parallel(scope, &files, profile.recommended_worker_count, cancel)
                    .await?
            }
        };
        self.metrics.record_strategy(strategy);
        check_cancelled(cancel, "before summarizing")?;

        summarize(&raw, &files, options.max_size)
    }

    async fn run_sequential(&self, scope: DiffScope, cancel: &CancellationToken) -> Result<String> {
        let raw = or_cancel(cancel, self.fetcher.fetch_diff(scope)).await?;
        self.metrics.record_fetched(raw.len());
        Ok(raw)
    }

    /// Fetch batches in priority order until the accumulated text exceeds
    /// the budget, then merge what was fetched into VCS order
    async fn run_incremental(
        &self,
        scope: DiffScope,
        files: &[FileInfo],
        budget: usize,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        let total_batches = paths.len().div_ceil(batch_size);
        let mut fetched: Vec<(ScopePart, String)> = Vec::new();
        let mut fetched_bytes = 0;

        for (batch_idx, batch) in paths.chunks(batch_size).enumerate() {
            check_cancelled(cancel, "between batches")?;

            let texts = or_cancel(cancel, fetch_batch(&self.fetcher, scope.parts(), batch)).await?;
            let batch_bytes: usize = texts.iter().map(|(_, text)| text.len()).sum();
            fetched_bytes += batch_bytes;
            fetched.extend(texts);
            self.metrics.record_batch(batch_bytes);
            tracing::debug!(
                "Incremental batch {}/{}: {} files, {} bytes so far",
                batch_idx + 1,
                total_batches,
                batch.len(),
                fetched_bytes
            );

            if fetched_bytes > budget {
                tracing::debug!(
                    "Budget of {} bytes exceeded after {} of {} batches",
                    budget,
                    batch_idx + 1,
                    total_batches
                );
                break;
            }
        }
        self.merge_in_vcs_order(scope, fetched, cancel).await
    }

    /// Fetch contiguous sub-batches on a `JoinSet` and merge them back into
    /// VCS order
    async fn run_parallel(
        &self,
        scope: DiffScope,
        files: &[FileInfo],
        workers: usize,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        let batch_len = paths.len().div_ceil(workers.max(1)).max(1);
        let batches: Vec<Vec<String>> = paths.chunks(batch_len).map(<[String]>::to_vec).collect();
        tracing::debug!(
            "Parallel fetch of {} files in {} batches",
            paths.len(),
            batches.len()
        );

        let mut set = JoinSet::new();
        for (idx, batch) in batches.iter().enumerate() {
            let fetcher = self.fetcher.clone();
            let batch = batch.clone();
            set.spawn(async move {
                let result = fetch_batch(&fetcher, scope.parts(), &batch).await;
                (idx, result)
            });
        }

        let mut results: Vec<Option<Vec<(ScopePart, String)>>> = vec![None; batches.len()];
        let mut failed = Vec::new();
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Diff resolution cancelled during parallel fetch");
                    // Dropping the set aborts every in-flight worker
                    return Err(DiffError::Cancelled);
                }
                joined = set.join_next() => joined,
            };
            match joined {
                None => break,
                Some(Ok((idx, Ok(texts)))) => results[idx] = Some(texts),
                Some(Ok((idx, Err(e)))) => {
                    tracing::warn!("Worker for batch {} failed: {}", idx, e);
                    failed.push(idx);
                }
                Some(Err(e)) => {
                    return Err(DiffError::other(format!("Fetch worker panicked: {}", e)));
                }
            }
        }

        failed.sort_unstable();
        for idx in failed {
            check_cancelled(cancel, "before batch retry")?;
            tracing::warn!("Retrying batch {} sequentially", idx);
            self.metrics.record_worker_retry();
            let texts =
                or_cancel(cancel, fetch_batch(&self.fetcher, scope.parts(), &batches[idx])).await?;
            results[idx] = Some(texts);
        }

        let texts: Vec<(ScopePart, String)> = results.into_iter().flatten().flatten().collect();
        for (_, text) in &texts {
            self.metrics.record_batch(text.len());
        }
        self.merge_in_vcs_order(scope, texts, cancel).await
    }

    /// Reorder fragments from all batches to (scope part, VCS index)
    async fn merge_in_vcs_order(
        &self,
        scope: DiffScope,
        texts: Vec<(ScopePart, String)>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut order: HashMap<ScopePart, HashMap<String, usize>> = HashMap::new();
        for part in scope.parts() {
            let listed = or_cancel(cancel, self.fetcher.part_changed_files(*part)).await?;
            order.insert(
                *part,
                listed.into_iter().enumerate().map(|(i, p)| (p, i)).collect(),
            );
        }

        let mut keyed: Vec<(ScopePart, usize, &str)> = Vec::new();
        for (part, text) in &texts {
            let positions = order.get(part);
            for fragment in FragmentParser::new(text) {
                let position = fragment
                    .path
                    .as_deref()
                    .and_then(|p| positions.and_then(|m| m.get(p)))
                    .copied()
                    .unwrap_or(usize::MAX);
                keyed.push((*part, position, fragment.text));
            }
        }
        keyed.sort_by_key(|(part, position, _)| (*part, *position));

        Ok(keyed.into_iter().map(|(_, _, text)| text).collect())
    }
}
