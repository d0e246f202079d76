//! Reconciliation between the local cache and the remote service.

mod invalidation;
mod mutation;
mod read;
mod repository;

pub use mutation::{
  provisional_score, toggle_vote, CommentCount, MutationKind, PendingMutation, Settled, SyncEntity,
};
pub use read::{ReadEvent, ReadStream};
pub use repository::SyncRepository;
