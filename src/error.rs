//! Error types for repo-pulse

use thiserror::Error;

/// Result type alias for repo-pulse operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for repo-pulse
#[derive(Error, Debug)]
pub enum Error {
    /// GitHub accepted the request but is still computing the statistics (HTTP 202).
    #[error("GitHub is still computing statistics for this repository")]
    StatsComputing,

    #[error("GitHub API error: {0}")]
    GitHubError(String),

    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Template error: {0}")]
    TemplateError(#[from] minijinja::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl Error {
    /// Whether the orchestrator should poll again instead of failing
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StatsComputing)
    }
}
