use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected HTTP status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("feed is neither RSS ({rss}) nor Atom ({atom})")]
    Parse { rss: String, atom: String },
    #[error(transparent)]
    Deadline(#[from] DeadlineExceeded),
}

/// Raised by the deadline race when the timer completes first.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation timed out after {0:?}")]
pub struct DeadlineExceeded(pub Duration);

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("gate was reset while waiting for admission")]
    Reset,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh run timed out after {0:?}")]
    Timeout(Duration),
    #[error("refresh run was cancelled")]
    Cancelled,
    #[error("refresh task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<DeadlineExceeded> for RefreshError {
    fn from(err: DeadlineExceeded) -> Self {
        RefreshError::Timeout(err.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SummaryError {
    #[error("language model is not available")]
    ModelUnavailable,
    #[error("no source text available for {0}")]
    NoSourceText(String),
    #[error("summary generation failed after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to locate a configuration directory")]
    NoConfigDir,
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
