// src/error.rs

//! Unified error handling for the graph crawler.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
///
/// Page-level fetch failures are deliberately absent: they are captured in
/// [`FetchResult`](crate::services::FetchResult) and never surface as `Err`.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// API credentials were not provided
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// The target account could not be resolved upstream
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// A persisted snapshot or index exists but cannot be read
    #[error("Corrupt persisted state at {path}: {message}")]
    CorruptState { path: String, message: String },

    /// Another crawl cycle holds this account
    #[error("Account {0} is already being crawled")]
    AccountBusy(String),

    /// The cycle was cancelled before commit
    #[error("Crawl cycle cancelled")]
    Cancelled,

    /// The account was not crawled because an earlier one failed fatally
    #[error("Skipped {0} after a fatal error")]
    Skipped(String),

    /// Connection count dropped beyond the configured threshold
    #[error(
        "Circuit breaker triggered for {direction}: {previous_count} -> {current_count} ({drop_percent:.1}% drop > {threshold_percent}%)"
    )]
    CircuitBreakerTriggered {
        direction: String,
        current_count: usize,
        previous_count: usize,
        drop_percent: f64,
        threshold_percent: u8,
    },

    /// A failed crawl returned nothing where there used to be connections
    #[error("Empty crawl result for {0}")]
    EmptyCrawlResult(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a corrupt-state error for the given file.
    pub fn corrupt(path: impl AsRef<Path>, message: impl fmt::Display) -> Self {
        Self::CorruptState {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error should stop every remaining account, not just the current one.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingCredentials(_) | Self::Config(_))
    }
}
