//! Error types for PaperFeeder.
//!
//! Library crates use [`PaperFeederError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all PaperFeeder operations.
#[derive(Debug, thiserror::Error)]
pub enum PaperFeederError {
    /// Configuration loading or validation error. Always fatal.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to a paper source or external API.
    #[error("network error: {0}")]
    Network(String),

    /// Feed, JSON or HTML parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// LLM endpoint error (transport, HTTP status, or unusable response).
    #[error("llm error: {0}")]
    Llm(String),

    /// External research (search API) error.
    #[error("research error: {0}")]
    Research(String),

    /// Report delivery error (email API or preview file).
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (out-of-range score, unknown identifier, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-text conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PaperFeederError>;

impl PaperFeederError {
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

    /// Whether this error must abort the run rather than be isolated.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PaperFeederError::config("no paper sources enabled");
        assert_eq!(err.to_string(), "config error: no paper sources enabled");

        let err = PaperFeederError::validation("score 11 outside 0..=10");
        assert!(err.to_string().contains("score 11"));
    }

    #[test]
    fn only_config_errors_are_fatal() {
        assert!(PaperFeederError::config("x").is_fatal());
        assert!(!PaperFeederError::Network("timeout".into()).is_fatal());
        assert!(!PaperFeederError::validation("bad").is_fatal());
    }
}
