//! Error types for the asset fetch module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching assets.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Invalid concurrency value provided.
    #[error("invalid concurrency value {value}: must be between 1 and 100")]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Every asset fetch in the job failed; no partial artifact exists.
    #[error("all {attempted} asset fetches failed")]
    AllFailed {
        /// Number of assets that were attempted.
        attempted: usize,
    },

    /// Network-level error (DNS, connection, TLS, mid-stream failure).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error response (non-2xx).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The provided URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// File system error during the fetch (create, write, flush).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
