//! Local-first cache and reconciliation engine for the CityWatch client.
//!
//! Reads go through [`SyncRepository`], which answers from the SQLite cache
//! first and then reconciles with the remote service using content checksums.
//! Writes are applied optimistically and rolled back if the server refuses.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod remote;
pub mod sync;

pub use cache::{CacheKey, CacheManager, CacheSource, LocalStore};
pub use config::{Config, SyncConfig};
pub use error::SyncError;
pub use remote::{HttpRemote, RemoteClient, RemoteError};
pub use sync::{PendingMutation, ReadEvent, ReadStream, SyncRepository};
