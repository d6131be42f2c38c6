/// Configuration system for diff-context
///
/// Supports loading from multiple sources with priority:
/// CLI args > Environment variables > Config file > Defaults
use crate::cache::TtlPolicy;
use crate::dispatcher::Strategy;
use crate::error::{ConfigError, DiffError};
use crate::paths::PlatformPaths;
use crate::validation::ValidationMode;
use crate::vcs::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Cache store configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// VCS query configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Chunking and summary configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Strategy selection configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Output validation configuration
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of cached query results
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// TTL for identity facts (branch, repository root)
    #[serde(default = "default_identity_ttl")]
    pub identity_ttl_secs: u64,

    /// TTL for working-tree facts (diffs, changed-file lists)
    #[serde(default = "default_working_tree_ttl")]
    pub working_tree_ttl_secs: u64,
}

/// VCS query configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchConfig {
    /// Timeout for name and identity queries
    #[serde(default = "default_light_timeout")]
    pub light_timeout_secs: u64,

    /// Timeout for diff body queries
    #[serde(default = "default_heavy_timeout")]
    pub heavy_timeout_secs: u64,

    /// Retry policy around every query
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry configuration for VCS queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per query; 1 disables retrying
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    /// Byte budget of the text handed to the consumer
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

/// Strategy selection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// Force a strategy; chosen per retrieval when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,

    /// Below this estimated size the whole diff is fetched at once
    #[serde(default = "default_sequential_max_bytes")]
    pub sequential_max_bytes: u64,

    /// At or above this estimated size batches are fetched concurrently
    #[serde(default = "default_parallel_min_bytes")]
    pub parallel_min_bytes: u64,

    /// Files per incremental batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on concurrent fetch workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

/// Output validation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ValidationConfig {
    #[serde(default)]
    pub mode: ValidationMode,
}

// Default value functions
fn default_max_entries() -> usize {
    crate::cache::DEFAULT_MAX_ENTRIES
}

fn default_identity_ttl() -> u64 {
    300
}

fn default_working_tree_ttl() -> u64 {
    5
}

fn default_light_timeout() -> u64 {
    10
}

fn default_heavy_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff() -> u64 {
    5_000
}

fn default_max_size() -> usize {
    16_384 // 16 KiB
}

fn default_sequential_max_bytes() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_parallel_min_bytes() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

fn default_batch_size() -> usize {
    50
}

fn default_max_workers() -> usize {
    4
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            identity_ttl_secs: default_identity_ttl(),
            working_tree_ttl_secs: default_working_tree_ttl(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            light_timeout_secs: default_light_timeout(),
            heavy_timeout_secs: default_heavy_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strategy: None,
            sequential_max_bytes: default_sequential_max_bytes(),
            parallel_min_bytes: default_parallel_min_bytes(),
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
        }
    }
}

impl CacheConfig {
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            identity: Duration::from_secs(self.identity_ttl_secs),
            working_tree: Duration::from_secs(self.working_tree_ttl_secs),
        }
    }
}

impl FetchConfig {
    pub fn light_timeout(&self) -> Duration {
        Duration::from_secs(self.light_timeout_secs)
    }

    pub fn heavy_timeout(&self) -> Duration {
        Duration::from_secs(self.heavy_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            multiplier: self.retry.multiplier,
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> DiffError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
    .into()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, DiffError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location or create default
    pub fn load_or_default() -> Result<Self, DiffError> {
        let config_path = PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::debug!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), DiffError> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), DiffError> {
        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries", "must be greater than 0"));
        }

        if self.fetch.light_timeout_secs == 0 {
            return Err(invalid("fetch.light_timeout_secs", "must be greater than 0"));
        }

        if self.fetch.heavy_timeout_secs == 0 {
            return Err(invalid("fetch.heavy_timeout_secs", "must be greater than 0"));
        }

        if self.fetch.retry.max_attempts == 0 {
            return Err(invalid("fetch.retry.max_attempts", "must be at least 1"));
        }

        if self.fetch.retry.multiplier < 1.0 {
            return Err(invalid(
                "fetch.retry.multiplier",
                format!("must be at least 1.0, got {}", self.fetch.retry.multiplier),
            ));
        }

        if self.chunking.max_size == 0 {
            return Err(invalid("chunking.max_size", "must be greater than 0"));
        }

        if self.dispatch.batch_size == 0 {
            return Err(invalid("dispatch.batch_size", "must be greater than 0"));
        }

        if self.dispatch.max_workers == 0 {
            return Err(invalid("dispatch.max_workers", "must be greater than 0"));
        }

        if self.dispatch.sequential_max_bytes > self.dispatch.parallel_min_bytes {
            return Err(invalid(
                "dispatch.sequential_max_bytes",
                format!(
                    "must not exceed dispatch.parallel_min_bytes ({} > {})",
                    self.dispatch.sequential_max_bytes, self.dispatch.parallel_min_bytes
                ),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Cache capacity
        if let Ok(value) = std::env::var("DIFF_CONTEXT_MAX_ENTRIES")
            && let Ok(entries) = value.parse()
        {
            self.cache.max_entries = entries;
        }

        // Output budget
        if let Ok(value) = std::env::var("DIFF_CONTEXT_MAX_SIZE")
            && let Ok(size) = value.parse()
        {
            self.chunking.max_size = size;
        }

        // Incremental batch size
        if let Ok(value) = std::env::var("DIFF_CONTEXT_BATCH_SIZE")
            && let Ok(size) = value.parse()
        {
            self.dispatch.batch_size = size;
        }

        // Worker cap
        if let Ok(value) = std::env::var("DIFF_CONTEXT_MAX_WORKERS")
            && let Ok(workers) = value.parse()
        {
            self.dispatch.max_workers = workers;
        }

        // Forced strategy
        if let Ok(value) = std::env::var("DIFF_CONTEXT_STRATEGY")
            && let Ok(strategy) = value.parse()
        {
            self.dispatch.strategy = Some(strategy);
        }

        // Validation mode
        if let Ok(value) = std::env::var("DIFF_CONTEXT_VALIDATION")
            && let Ok(mode) = value.parse()
        {
            self.validation.mode = mode;
        }
    }

    /// Create a new Config with defaults and environment overrides
    pub fn new() -> Result<Self, DiffError> {
        let mut config = Self::load_or_default()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::new`], but a `.diff-context.toml` at the repository
    /// root takes the place of the platform config file
    pub fn for_repo(repo: &Path) -> Result<Self, DiffError> {
        let local = PlatformPaths::repo_config_path(repo);
        let mut config = if local.exists() {
            tracing::info!("Loading config from: {}", local.display());
            Self::from_file(&local)?
        } else {
            Self::load_or_default()?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
