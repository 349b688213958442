//! # taxa-cache
//!
//! Content-addressed local cache of upstream taxon documents and the change
//! detector that hashes them.
//!
//! [`FsCache`] is the on-disk store; [`MemoryCache`] is a drop-in substitute
//! for tests. Both implement [`CacheStore`].

pub mod digest;
pub mod error;
pub mod staleness;
pub mod store;

pub use digest::Classification;
pub use error::CacheError;
pub use staleness::{freshness, is_stale, Freshness};
pub use store::{write_atomic, CacheEntry, CacheStore, FsCache, MemoryCache};
