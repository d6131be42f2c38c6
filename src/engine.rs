//! Engine facade tying the cache, fetcher, dispatcher and validation together
//!
//! This is the main entry point when using diff-context as a library.

use crate::cache::{CacheStats, CacheStore};
use crate::chunker::DiffSummary;
use crate::config::Config;
use crate::dispatcher::{AdaptiveDispatcher, ResolveOptions};
use crate::error::{DiffError, Result};
use crate::fetcher::{DiffFetcher, DiffScope};
use crate::instrumentation::{HealthReport, Metrics};
use crate::validation::{SensitiveDataScanner, ValidationMode};
use crate::vcs::{CommandRunner, GitCommandRunner};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Bounded diff retrieval for one repository
///
/// The engine owns the only state kept across calls: the query cache and the
/// counters. Clones share both.
///
/// # Example
///
/// ```no_run
/// use diff_context::{DiffEngine, DiffScope};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let engine = DiffEngine::new(".")?;
///     let text = engine.get_diff(DiffScope::Staged, 8192).await?;
///     println!("{}", text);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DiffEngine {
    pub(crate) cache: Arc<CacheStore<String>>,
    pub(crate) dispatcher: AdaptiveDispatcher,
    pub(crate) scanner: Arc<SensitiveDataScanner>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) config: Arc<Config>,
}

impl DiffEngine {
    /// Create an engine for the repository at `repo` using the loaded
    /// configuration (repository or platform file, then environment overrides)
    pub fn new(repo: impl AsRef<Path>) -> Result<Self> {
        let config = Config::for_repo(repo.as_ref())?;
        Ok(Self::with_config(repo, config))
    }

    /// Create an engine that runs `git` in `repo`
    pub fn with_config(repo: impl AsRef<Path>, config: Config) -> Self {
        Self::with_runner(Arc::new(GitCommandRunner::new(repo)), config)
    }

    /// Create an engine over any command runner
    pub fn with_runner(runner: Arc<dyn CommandRunner>, config: Config) -> Self {
        let cache = Arc::new(CacheStore::new(config.cache.max_entries));
        let metrics = Arc::new(Metrics::new());
        let fetcher = DiffFetcher::new(runner, cache.clone())
            .with_ttl_policy(config.cache.ttl_policy())
            .with_retry_policy(config.fetch.retry_policy())
            .with_timeouts(config.fetch.light_timeout(), config.fetch.heavy_timeout());
        let dispatcher =
            AdaptiveDispatcher::new(fetcher, config.dispatch.clone(), metrics.clone());

        Self {
            cache,
            dispatcher,
            scanner: Arc::new(SensitiveDataScanner::new()),
            metrics,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bounded text for `scope`, at most `max_size` bytes
    pub async fn get_diff(&self, scope: DiffScope, max_size: usize) -> Result<String> {
        let summary = self
            .get_diff_with(scope, ResolveOptions::new(max_size), &CancellationToken::new())
            .await?;
        Ok(summary.text)
    }

    /// Bounded text plus the full chunk list, with per-invocation overrides
    /// and cancellation
    pub async fn get_diff_with(
        &self,
        scope: DiffScope,
        options: ResolveOptions,
        cancel: &CancellationToken,
    ) -> Result<DiffSummary> {
        self.metrics.record_request();

        let result = self.resolve(scope, &options, cancel).await;
        match &result {
            Ok(summary) => self.metrics.record_returned(summary.text.len()),
            Err(DiffError::Fetch(e)) => {
                self.metrics.record_failure();
                tracing::warn!("Diff retrieval failed: {}", e);
            }
            Err(DiffError::Cancelled) => self.metrics.record_cancelled(),
            Err(_) => {}
        }
        result
    }

    async fn resolve(
        &self,
        scope: DiffScope,
        options: &ResolveOptions,
        cancel: &CancellationToken,
    ) -> Result<DiffSummary> {
        let fetcher = self.dispatcher.fetcher();
        let root = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DiffError::Cancelled),
            root = fetcher.repo_root() => root?,
        };
        tracing::debug!("Repository root: {}", root);

        let summary = self.dispatcher.resolve(scope, options, cancel).await?;
        self.apply_validation(summary)
    }

    /// Run the sensitive-data stage over the text and every chunk part
    fn apply_validation(&self, mut summary: DiffSummary) -> Result<DiffSummary> {
        let mode = self.config.validation.mode;
        if mode == ValidationMode::Off {
            return Ok(summary);
        }

        let validated = self
            .scanner
            .validate(std::mem::take(&mut summary.text), mode)?;
        summary.text = validated.text;
        self.metrics.record_redactions(validated.redactions);

        for part in summary.chunks.iter_mut().flat_map(|c| c.parts.iter_mut()) {
            part.text = self
                .scanner
                .validate(std::mem::take(&mut part.text), mode)?
                .text;
        }
        Ok(summary)
    }

    /// Name of the checked-out branch
    pub async fn current_branch(&self) -> Result<String> {
        Ok(self.dispatcher.fetcher().current_branch().await?)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached query result and reset cache statistics
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport::new(self.cache.stats(), self.metrics.snapshot())
    }
}
