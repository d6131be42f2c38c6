//! # diff-context - Bounded Diff Retrieval for Size-Limited Consumers
//!
//! Retrieves the pending changeset of a git repository and turns it into an
//! information-dense text that fits a hard byte budget.
//!
//! ## Overview
//!
//! Querying the changeset is expensive and repeated often within one run, so
//! every query goes through a TTL/LRU cache keyed by the query itself. Real
//! changesets can be far larger than the budget, so changed files are ranked
//! by likely importance, split on file boundaries, and oversized files are
//! truncated with explicit omission markers. Nothing is dropped silently:
//! every changed path appears in the manifest.
//!
//! ## Architecture
//!
//! ```text
//!   DiffEngine ──► AdaptiveDispatcher ──► Sequential | Incremental | Parallel
//!        │                 │                          │
//!        │                 ▼                          ▼
//!        │           classifier                  DiffFetcher ──► CacheStore
//!        │                 │                          │
//!        ▼                 ▼                          ▼
//!   validation ◄──── chunker::summarize       CommandRunner (git)
//! ```
//!
//! ## Modules
//!
//! - [`cache`]: TTL + LRU store with hit/miss/eviction statistics
//! - [`vcs`]: Command runner boundary, git runner and retry policy
//! - [`fetcher`]: Cached changeset queries per scope and path batch
//! - [`classifier`]: File type and priority tagging
//! - [`chunker`]: Fragment parsing, truncation, chunking and summaries
//! - [`dispatcher`]: Strategy selection, batching and parallel fetch
//! - [`validation`]: Sensitive-data detection over the final text
//! - [`instrumentation`]: Counters and health report
//! - [`engine`]: The [`DiffEngine`] facade
//! - [`config`]: Configuration management with environment variable support
//! - [`error`]: Error types and result aliases
//! - [`paths`]: Platform config directory
//!
//! ## Usage Example
//!
//! ```no_run
//! use diff_context::{DiffEngine, DiffScope};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = DiffEngine::new(".")?;
//!     let text = engine.get_diff(DiffScope::Both, 16 * 1024).await?;
//!     println!("{}", text);
//!     println!("{:?}", engine.cache_stats());
//!     Ok(())
//! }
//! ```

/// TTL + LRU cache for changeset queries
pub mod cache;

/// Fragment parsing, truncation and size-bounded chunking
pub mod chunker;

/// File type and priority classification
pub mod classifier;

/// Configuration management with environment variable overrides
pub mod config;

/// Strategy selection and execution
pub mod dispatcher;

/// Engine facade
pub mod engine;

/// Error types and utilities
pub mod error;

/// Cached changeset queries
pub mod fetcher;

/// Counters and health reporting
pub mod instrumentation;

/// Platform-specific paths
pub mod paths;

/// Sensitive-data detection
pub mod validation;

/// Version-control command boundary
pub mod vcs;

pub use cache::{CacheStats, CacheStore};
pub use chunker::{DiffChunk, DiffSummary, NO_CHANGES_MARKER, split, summarize};
pub use classifier::{FileInfo, FileType, classify};
pub use config::Config;
pub use dispatcher::{ResolveOptions, Strategy};
pub use engine::DiffEngine;
pub use error::{DiffError, FetchError, Result};
pub use fetcher::{ChangedFile, DiffScope};
pub use instrumentation::HealthReport;
pub use validation::ValidationMode;
pub use vcs::{CommandRunner, GitCommandRunner};
