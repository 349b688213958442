//! # taxa-sync
//!
//! Persistent authority table, run ledger and the consolidation engine that
//! reconciles an accepted set against them.
//!
//! The single write entry point is [`run_consolidation`]; everything else on
//! [`Database`] is read access for reporting and export.

pub mod accepted;
pub mod authority;
pub mod db;
pub mod engine;
pub mod error;
pub mod ledger;

pub use accepted::{collect_accepted, AcceptedRecord, AcceptedSet, SkippedId};
pub use db::Database;
pub use engine::{run_consolidation, transition, Transition};
pub use error::SyncError;
