/// Centralized error types for diff-context using thiserror
///
/// Only the fetch layer and the budget layer produce errors that reach the
/// caller. Classification and chunking never fail on malformed input.
use thiserror::Error;

/// Main error type for diff retrieval
#[derive(Error, Debug)]
pub enum DiffError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Size budget of {budget} bytes cannot hold the minimal summary ({required} bytes)")]
    SizeBudgetUnsatisfiable { required: usize, budget: usize },

    #[error("Diff resolution was cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised by the VCS command runner and surfaced by the fetcher
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Not a git repository: {0}")]
    NotARepository(String),

    #[error("Command '{command}' timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    #[error("Command '{command}' exited with code {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// A single sensitive-data match found in the bounded output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitiveMatch {
    pub kind: &'static str,
    pub line_number: usize,
}

/// Errors related to request and output validation
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Potential sensitive information detected ({}); remove API keys or tokens before sending", summarize_matches(.0))]
    SensitiveData(Vec<SensitiveMatch>),

    #[error("{field} must be {constraint}, got {actual}")]
    ConstraintViolation {
        field: String,
        constraint: String,
        actual: String,
    },

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn summarize_matches(matches: &[SensitiveMatch]) -> String {
    matches
        .iter()
        .map(|m| format!("{} on line {}", m.kind, m.line_number))
        .collect::<Vec<_>>()
        .join(", ")
}

impl FetchError {
    /// Whether a retry policy may try the query again
    ///
    /// A missing repository never becomes present by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout { .. } | FetchError::Failed { .. })
    }
}

// Conversion from anyhow::Error to DiffError
impl From<anyhow::Error> for DiffError {
    fn from(err: anyhow::Error) -> Self {
        DiffError::Other(format!("{:#}", err))
    }
}

impl DiffError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        DiffError::Other(msg.into())
    }

    /// Convert to a user-facing error string
    pub fn to_user_string(&self) -> String {
        format!("{}", self)
    }

    /// Check if this is a caller mistake (bad budget, bad options, not a repo)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            DiffError::SizeBudgetUnsatisfiable { .. }
                | DiffError::Validation(ValidationError::InvalidValue(..))
                | DiffError::Validation(ValidationError::ConstraintViolation { .. })
                | DiffError::Config(ConfigError::InvalidValue { .. })
                | DiffError::Fetch(FetchError::NotARepository(_))
        )
    }

    /// Check if the caller may retry this request
    pub fn is_retryable(&self) -> bool {
        match self {
            DiffError::Fetch(e) => e.is_retryable(),
            DiffError::Io(_) => true,
            _ => false,
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, DiffError>;
