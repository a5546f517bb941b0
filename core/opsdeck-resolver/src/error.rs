//! Error types for component resolution.

use serde::Serialize;
use thiserror::Error;

/// Why a single candidate source could not be loaded.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not found")]
    NotFound,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Request(String),
}

/// One failed candidate, in the order it was tried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub source: String,
    pub error: String,
}

/// Every candidate for a toolkit's UI entry failed.
///
/// Callers render a degraded placeholder from this instead of failing the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("could not load component for '{slug}' after {} attempt(s)", .attempts.len())]
pub struct LoadFailure {
    pub slug: String,
    pub attempts: Vec<Attempt>,
}

impl LoadFailure {
    pub fn kind(&self) -> &'static str {
        "load_failure"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_failure_display_counts_attempts() {
        let failure = LoadFailure {
            slug: "demo".into(),
            attempts: vec![Attempt {
                source: "local:/src/demo/panel.tsx".into(),
                error: FetchError::NotFound.to_string(),
            }],
        };
        assert_eq!(
            failure.to_string(),
            "could not load component for 'demo' after 1 attempt(s)"
        );
        assert_eq!(failure.kind(), "load_failure");
    }
}
