//! Error types for taxa-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving settings and paths.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on a config file, with path context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value '{value}' for {key}")]
    InvalidSetting { key: String, value: String },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or TAXA_DATA_ROOT")]
    HomeNotFound,
}

/// A stored string did not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// A payload could not be turned into a [`crate::CanonicalRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no taxonId")]
    MissingTaxonId,

    #[error("taxonId is not an integer: {0}")]
    InvalidTaxonId(String),

    #[error("payload taxonId {found} does not match cache id {expected}")]
    IdMismatch { expected: i64, found: i64 },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
