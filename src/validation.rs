//! Sensitive-data check over the final bounded text

use crate::error::{SensitiveMatch, ValidationError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Replacement for a redacted match; shorter than any pattern's minimum match
pub const REDACTION: &str = "[REDACTED]";

const CRITICAL_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)sk-[a-zA-Z0-9\-_]{32,}", "OpenAI API Key"),
    (r"(?i)ghp_[a-zA-Z0-9]{36}", "GitHub Personal Access Token"),
    (r"(?i)AKIA[0-9A-Z]{16}", "AWS Access Key"),
    (r"(?i)xoxb-[a-zA-Z0-9\-]{40,}", "Slack Token"),
];

/// How the engine treats sensitive data found in its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// No scanning
    Off,
    /// Replace matches with [`REDACTION`] and log a warning
    #[default]
    Lenient,
    /// Fail with [`ValidationError::SensitiveData`]
    Strict,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationMode::Off => "off",
            ValidationMode::Lenient => "lenient",
            ValidationMode::Strict => "strict",
        };
        f.write_str(name)
    }
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Ok(ValidationMode::Off),
            "lenient" | "redact" => Ok(ValidationMode::Lenient),
            "strict" => Ok(ValidationMode::Strict),
            other => Err(format!(
                "unknown validation mode '{}', expected off, lenient or strict",
                other
            )),
        }
    }
}

/// Outcome of a validation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub text: String,
    pub redactions: usize,
}

/// Scans text for credential-shaped strings
#[derive(Debug, Clone)]
pub struct SensitiveDataScanner {
    patterns: Vec<(Regex, &'static str)>,
}

impl Default for SensitiveDataScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl SensitiveDataScanner {
    pub fn new() -> Self {
        let patterns = CRITICAL_PATTERNS
            .iter()
            .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, *kind)))
            .collect();
        Self { patterns }
    }

    /// Every match with its 1-based line number, ordered by position
    pub fn scan(&self, text: &str) -> Vec<SensitiveMatch> {
        let mut found: Vec<(usize, SensitiveMatch)> = Vec::new();
        for (re, kind) in &self.patterns {
            for m in re.find_iter(text) {
                let line_number = text[..m.start()].matches('\n').count() + 1;
                found.push((
                    m.start(),
                    SensitiveMatch {
                        kind: *kind,
                        line_number,
                    },
                ));
            }
        }
        found.sort_by_key(|(start, _)| *start);
        found.into_iter().map(|(_, m)| m).collect()
    }

    /// Apply `mode` to `text`
    pub fn validate(&self, text: String, mode: ValidationMode) -> Result<Validated, ValidationError> {
        if mode == ValidationMode::Off {
            return Ok(Validated {
                text,
                redactions: 0,
            });
        }

        let matches = self.scan(&text);
        if matches.is_empty() {
            return Ok(Validated {
                text,
                redactions: 0,
            });
        }

        match mode {
            ValidationMode::Strict => Err(ValidationError::SensitiveData(matches)),
            _ => {
                let mut redacted = text;
                for (re, _) in &self.patterns {
                    redacted = re.replace_all(&redacted, REDACTION).into_owned();
                }
                tracing::warn!(
                    "Redacted {} potential secret(s) from diff output",
                    matches.len()
                );
                Ok(Validated {
                    text: redacted,
                    redactions: matches.len(),
                })
            }
        }
    }
}
