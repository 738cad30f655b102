//! Error types for listingscout.
//!
//! Library crates use [`ListingScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all listingscout operations.
#[derive(Debug, thiserror::Error)]
pub enum ListingScoutError {
    /// Configuration loading or invalid setting.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching menu or detail pages.
    #[error("network error: {0}")]
    Network(String),

    /// HTML, JSON, or price parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The operation was abandoned because a shutdown was requested.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ListingScoutError>;

impl ListingScoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
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

    /// Whether this error came from a shutdown request rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ListingScoutError::config("total_pages must be positive");
        assert_eq!(err.to_string(), "config error: total_pages must be positive");

        let err = ListingScoutError::Network("https://example.com: HTTP 503".into());
        assert!(err.to_string().contains("HTTP 503"));
    }

    #[test]
    fn cancelled_is_distinguishable() {
        assert!(ListingScoutError::Cancelled("stop requested".into()).is_cancelled());
        assert!(!ListingScoutError::Storage("locked".into()).is_cancelled());
    }
}
