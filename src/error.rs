use thiserror::Error;

/// Errors surfaced by the cache, storage and provider layers.
///
/// Per-image failures never reach callers of the batch APIs; they are
/// logged and degrade to placeholders. These variants are what the
/// lower-level building blocks report to each other.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered, but not with 200.
    #[error("download of {url} returned status {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("download of {0} timed out")]
    DownloadTimeout(String),

    #[error("storage error for '{key}': {reason}")]
    Storage { key: String, reason: String },

    #[error("content provider error: {0}")]
    Provider(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
