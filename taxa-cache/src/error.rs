//! Error types for taxa-cache.

use std::path::PathBuf;

use thiserror::Error;

use taxa_core::TaxonId;

/// Errors from cache reads and writes.
///
/// A corrupt entry on disk is not an error: `get` reports it as absent.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("cache JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A found entry must carry a payload.
    #[error("cannot cache taxon {id} as found without a payload")]
    MissingPayload { id: TaxonId },
}

/// Convenience constructor for [`CacheError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.into(),
        source,
    }
}
