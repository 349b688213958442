//! Error types for taxa-fetch.

use std::path::PathBuf;

use thiserror::Error;

use taxa_cache::CacheError;

/// Errors from talking to the upstream taxon service.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure or non-success status.
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    /// The requested resource does not exist upstream.
    #[error("not found upstream: {url}")]
    NotFound { url: String },

    /// The response body was not the JSON shape we expect.
    #[error("unexpected response from {url}: {detail}")]
    Unexpected { url: String, detail: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// No subscription key in the environment.
    #[error("missing API subscription key (set {0})")]
    MissingKey(&'static str),

    /// No upstream taxon matches the configured root name.
    #[error("could not identify root taxon '{0}' upstream")]
    RootNotFound(String),
}

pub(crate) fn unexpected(url: &str, detail: impl Into<String>) -> FetchError {
    FetchError::Unexpected {
        url: url.to_string(),
        detail: detail.into(),
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.into(),
        source,
    }
}
