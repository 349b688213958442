//! taxa core library: domain types, record extraction, settings, errors.
//!
//! - [`types`]: identifier newtypes, row / run / change structs
//! - [`record`]: [`CanonicalRecord`] extraction and [`InclusionFilter`]
//! - [`config`]: layered [`Settings`]
//! - [`error`]: [`CoreError`], [`ExtractError`]

pub mod config;
pub mod error;
pub mod record;
pub mod types;

pub use config::Settings;
pub use error::{CoreError, ExtractError, ParseEnumError};
pub use record::{CanonicalRecord, InclusionFilter};
pub use types::{
    AuthorityRow, ChangeKind, ChangeRecord, ContentHash, FetchStatus, LocalIndex, RowState,
    RunCounts, RunId, RunRecord, RunScope, RunStatus, TaxonId,
};
