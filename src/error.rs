//! Error taxonomy for download and pipeline failures

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while fetching one file or negotiating one item.
///
/// Transient and remote-rejection errors are retried by the download
/// engine; everything else surfaces immediately but only fails the
/// offending item, never the whole run.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level failure or timeout; retried.
    #[error("transient I/O error: {0}")]
    Transient(String),

    /// The server answered with a non-success status; retried up to the
    /// same limit as transient errors.
    #[error("remote rejected request with status {status} for {url}")]
    RemoteRejected { status: u16, url: String },

    /// Malformed input (URL, quality ceiling, credential string).
    #[error("invalid input: {0}")]
    Validation(String),

    /// Login or credential refresh failed; callers degrade to anonymous.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Local filesystem failure while streaming; treated like a flaky
    /// network and retried.
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Whether the engine should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DownloadError::Transient(_)
                | DownloadError::RemoteRejected { .. }
                | DownloadError::Filesystem { .. }
        )
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            DownloadError::RemoteRejected {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            DownloadError::Transient(err.to_string())
        }
    }
}
