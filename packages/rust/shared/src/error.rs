//! Error types for siteharvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! App crates (cli) wrap this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all siteharvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A required credential or endpoint address is missing; fails fast, never retried.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// Network/timeout failure on a single remote call.
    #[error("network error: {0}")]
    Network(String),

    /// A remote crawl task reached its `failed` terminal state.
    #[error("remote task failed: {0}")]
    TaskFailed(String),

    /// Polling gave up after the bounded attempt count without a terminal state.
    #[error("polling exhausted for task {task_id} after {attempts} attempts")]
    PollingExhausted { task_id: String, attempts: u32 },

    /// Embedding call failure; pages are persisted without a vector instead.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Both smart-site discovery strategies failed; both causes carried for diagnosis.
    #[error("all crawl strategies failed — native: {native}; manual: {manual}")]
    StrategyExhausted { native: String, manual: String },

    /// User-initiated cancellation, distinguished from failure.
    #[error("crawl cancelled")]
    Cancelled,

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Data validation error (schema mismatch, invalid address, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is the cooperative-cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = HarvestError::config("missing backend address");
        assert_eq!(err.to_string(), "config error: missing backend address");

        let err = HarvestError::PollingExhausted {
            task_id: "task-9".into(),
            attempts: 30,
        };
        assert!(err.to_string().contains("task-9"));
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn strategy_exhausted_carries_both_causes() {
        let err = HarvestError::StrategyExhausted {
            native: "HTTP 500".into(),
            manual: "timeout".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("HTTP 500"));
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn cancelled_is_distinguished() {
        assert!(HarvestError::Cancelled.is_cancelled());
        assert!(!HarvestError::Network("reset".into()).is_cancelled());
    }
}
