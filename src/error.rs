use thiserror::Error;

use crate::remote::RemoteError;

/// Errors surfaced to callers of the sync repository.
///
/// Local store failures never show up here: they are logged and treated as an
/// empty cache or a write that had no effect.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
  #[error("not signed in")]
  NotSignedIn,
  #[error(transparent)]
  Remote(#[from] RemoteError),
  #[error("{kind} {id} not found")]
  NotFound { kind: &'static str, id: String },
  #[error("invalid vote value {0}, expected -1, 0 or 1")]
  InvalidVote(i64),
}

impl SyncError {
  pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
    SyncError::NotFound {
      kind,
      id: id.to_string(),
    }
  }
}
