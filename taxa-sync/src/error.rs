//! Error types for taxa-sync.

use std::path::PathBuf;

use thiserror::Error;

use taxa_cache::CacheError;
use taxa_core::{ParseEnumError, RunId};

/// All errors that can arise while consolidating or reading the ledger.
///
/// Any of these raised inside a consolidation pass rolls the pass back.
#[derive(Debug, Error)]
pub enum SyncError {
    /// SQLite failure (constraint, trigger abort, I/O inside SQLite, ...).
    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// An error from the cache store.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored enum column holds an unknown value.
    #[error("corrupt ledger value: {0}")]
    Corrupt(#[from] ParseEnumError),

    /// The requested run does not exist.
    #[error("run {0} not found")]
    RunNotFound(RunId),

    /// The database was created by an incompatible schema version.
    #[error("unsupported schema version {found} (expected {expected})")]
    SchemaVersion { found: String, expected: &'static str },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
