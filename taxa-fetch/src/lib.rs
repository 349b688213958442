//! # taxa-fetch
//!
//! Upstream access for the taxa pipeline: the [`TaxonSource`] seam, its
//! network implementation, batched cache refresh and the source revision
//! fingerprint used for fast exits.

pub mod client;
pub mod error;
pub mod refresh;
pub mod revision;
pub mod source;

pub use client::ArtdatabankenClient;
pub use error::FetchError;
pub use refresh::{plan_refresh, refresh_cache, RefreshPolicy, RefreshSummary};
pub use revision::{source_hash, SourceRevision};
pub use source::TaxonSource;
