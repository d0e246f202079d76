//! Local persistence for offline-first reads.
//!
//! - `LocalStore` is plain SQLite storage with no staleness policy
//! - `CacheManager` runs store calls on a bounded worker pool, absorbs store
//!   errors, hashes collections and answers TTL questions
//! - `Cacheable` gives every entity a field-derived fingerprint for hashing

mod manager;
mod storage;
mod traits;

pub use manager::{CacheManager, DEFAULT_WORKERS};
pub use storage::LocalStore;
pub use traits::{CacheKey, CacheSource, Cacheable, Votable};

#[cfg(test)]
pub(crate) use storage::tests as fixtures;
