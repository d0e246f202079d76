//! Optimistic mutations.
//!
//! A mutation runs in two steps. The repository applies the change to the
//! caller's list and the local store right away and hands back a
//! [`PendingMutation`]. Settling it sends the remote request: on success the
//! server's values replace the provisional ones and the owning collections are
//! flagged dirty; on failure every touched field is restored from the snapshot.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use super::invalidation::{mark_dirty, Invalidation};
use crate::cache::{CacheKey, CacheManager, Cacheable, Votable};
use crate::error::SyncError;
use crate::model::{Comment, Report, Vote, VoteDirection};
use crate::remote::{RemoteError, VoteResult};

/// Vote after pressing `request` while holding `current`.
pub fn toggle_vote(current: Vote, request: VoteDirection) -> Vote {
  let request = Vote::from(request);
  if current == request {
    Vote::NONE
  } else {
    request
  }
}

/// Score shown until the server answers.
pub fn provisional_score(old_score: i64, current: Vote, new: Vote) -> i64 {
  old_score - current.value() + new.value()
}

/// Entities that can be mutated optimistically.
#[async_trait]
pub trait SyncEntity: Votable {
  fn set_id(&mut self, id: String);

  /// The cached collection this entity lives in.
  fn collection(&self) -> CacheKey;

  /// Write the whole entity.
  async fn save(&self, cache: &CacheManager);

  /// Write only the user-editable fields.
  async fn save_fields(&self, cache: &CacheManager);

  async fn forget(cache: &CacheManager, id: &str);

  async fn save_score(cache: &CacheManager, id: &str, score: i64);
}

#[async_trait]
impl SyncEntity for Report {
  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn collection(&self) -> CacheKey {
    CacheKey::Reports
  }

  async fn save(&self, cache: &CacheManager) {
    cache.upsert_report(self.clone()).await;
  }

  async fn save_fields(&self, cache: &CacheManager) {
    cache.update_report_fields(self.clone()).await;
  }

  async fn forget(cache: &CacheManager, id: &str) {
    cache.delete_report(id).await;
  }

  async fn save_score(cache: &CacheManager, id: &str, score: i64) {
    cache.update_report_score(id, score).await;
  }
}

#[async_trait]
impl SyncEntity for Comment {
  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn collection(&self) -> CacheKey {
    CacheKey::comments(&self.report_id)
  }

  async fn save(&self, cache: &CacheManager) {
    cache.upsert_comment(self.clone()).await;
  }

  async fn save_fields(&self, cache: &CacheManager) {
    cache.update_comment_content(&self.id, &self.content).await;
  }

  async fn forget(cache: &CacheManager, id: &str) {
    cache.delete_comment(id).await;
  }

  async fn save_score(cache: &CacheManager, id: &str, score: i64) {
    cache.update_comment_score(id, score).await;
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  Vote,
  Submit,
  Edit,
  StatusChange,
  Delete,
}

impl fmt::Display for MutationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      MutationKind::Vote => "vote",
      MutationKind::Submit => "submit",
      MutationKind::Edit => "edit",
      MutationKind::StatusChange => "status change",
      MutationKind::Delete => "delete",
    })
  }
}

/// What a mutation overwrote, enough to put it back.
pub(crate) enum Snapshot<T> {
  Vote { score: i64, vote: Vote },
  Replaced(T),
  Removed { index: usize, item: T },
  Inserted,
}

/// Successful remote answer.
pub(crate) enum Ack {
  Vote(VoteResult),
  Created(String),
  Done,
}

pub(crate) type Request = BoxFuture<'static, Result<Ack, RemoteError>>;

/// Runs after a confirmed submit, with the server id.
pub(crate) type FollowUp =
  Box<dyn FnOnce(String) -> BoxFuture<'static, Result<(), RemoteError>> + Send>;

/// Parent report's comment count around a comment submit or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentCount {
  pub report_id: String,
  /// Count to show again if the mutation rolls back
  pub before: i64,
  /// Count shown now
  pub after: i64,
}

/// Result of a settled mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
  /// Id of the affected entity; for a submit this is the server-assigned id
  pub id: String,
  /// Photo upload after a submit, reported separately from the submit itself
  pub photo: Option<Result<(), SyncError>>,
}

/// Shared handles a mutation needs after the repository call returns.
#[derive(Clone)]
pub(crate) struct MutationContext {
  pub cache: CacheManager,
  pub invalidation: Arc<Invalidation>,
  pub viewer_id: String,
}

/// An optimistic change that has been applied locally and not yet confirmed.
///
/// Dropping it without calling [`PendingMutation::settle`] sends nothing to
/// the server and leaves the provisional state in the caller's list and in
/// the local store. That state is only replaced by the next remote fetch of
/// the collection.
#[must_use = "the change stays provisional until settled"]
pub struct PendingMutation<T: SyncEntity> {
  kind: MutationKind,
  id: String,
  snapshot: Snapshot<T>,
  request: Request,
  follow_up: Option<FollowUp>,
  ctx: MutationContext,
  invalidates: Vec<CacheKey>,
  comment_count: Option<CommentCount>,
}

impl<T: SyncEntity> PendingMutation<T> {
  pub(crate) fn new(
    ctx: MutationContext,
    kind: MutationKind,
    id: &str,
    snapshot: Snapshot<T>,
    request: Request,
  ) -> Self {
    Self {
      kind,
      id: id.to_string(),
      snapshot,
      request,
      follow_up: None,
      ctx,
      invalidates: Vec::new(),
      comment_count: None,
    }
  }

  /// Flag these collections dirty once the server confirms.
  pub(crate) fn invalidating(mut self, keys: Vec<CacheKey>) -> Self {
    self.invalidates = keys;
    self
  }

  pub(crate) fn with_comment_count(mut self, count: Option<CommentCount>) -> Self {
    self.comment_count = count;
    self
  }

  pub(crate) fn with_follow_up(mut self, follow_up: Option<FollowUp>) -> Self {
    self.follow_up = follow_up;
    self
  }

  pub fn kind(&self) -> MutationKind {
    self.kind
  }

  /// Id of the entity as it currently sits in the caller's list.
  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn comment_count(&self) -> Option<&CommentCount> {
    self.comment_count.as_ref()
  }

  /// Send the remote request and confirm or roll back `list`.
  pub async fn settle(self, list: &mut Vec<T>) -> Result<Settled, SyncError> {
    let PendingMutation {
      kind,
      id,
      snapshot,
      request,
      follow_up,
      ctx,
      invalidates,
      comment_count,
    } = self;

    match request.await {
      Ok(ack) => {
        let id = confirm(&ctx, list, id, snapshot, ack).await;
        for key in &invalidates {
          mark_dirty(&ctx.invalidation, &ctx.cache, key).await;
        }
        info!(%kind, entity = T::entity_type(), %id, "Mutation confirmed");

        let photo = match follow_up {
          Some(upload) => {
            let result = upload(id.clone()).await.map_err(SyncError::from);
            if let Err(e) = &result {
              warn!(%id, error = %e, "Photo upload failed after submit");
            }
            Some(result)
          }
          None => None,
        };
        Ok(Settled { id, photo })
      }
      Err(e) => {
        warn!(%kind, entity = T::entity_type(), %id, error = %e, "Mutation failed, rolling back");
        rollback(&ctx, list, &id, snapshot).await;
        if let Some(count) = &comment_count {
          ctx
            .cache
            .update_report_comment_count(&count.report_id, count.before)
            .await;
        }
        Err(e.into())
      }
    }
  }
}

fn find_mut<'a, T: Cacheable>(list: &'a mut [T], id: &str) -> Option<&'a mut T> {
  list.iter_mut().find(|item| item.cache_key() == id)
}

/// Apply the server's answer. Returns the entity's final id.
async fn confirm<T: SyncEntity>(
  ctx: &MutationContext,
  list: &mut [T],
  id: String,
  snapshot: Snapshot<T>,
  ack: Ack,
) -> String {
  match (snapshot, ack) {
    (Snapshot::Vote { .. }, Ack::Vote(result)) => {
      if let Some(item) = find_mut(list, &id) {
        item.set_score(result.score);
        item.set_viewer_vote(result.viewer_vote);
      }
      T::save_score(&ctx.cache, &id, result.score).await;
      ctx
        .cache
        .put_vote(T::vote_subject(), &id, &ctx.viewer_id, result.viewer_vote)
        .await;
      id
    }
    (Snapshot::Inserted, Ack::Created(server_id)) => {
      T::forget(&ctx.cache, &id).await;
      if let Some(item) = find_mut(list, &id) {
        item.set_id(server_id.clone());
        item.save(&ctx.cache).await;
      }
      server_id
    }
    _ => id,
  }
}

/// Put back everything the optimistic step changed.
async fn rollback<T: SyncEntity>(
  ctx: &MutationContext,
  list: &mut Vec<T>,
  id: &str,
  snapshot: Snapshot<T>,
) {
  match snapshot {
    Snapshot::Vote { score, vote } => {
      if let Some(item) = find_mut(list, id) {
        item.set_score(score);
        item.set_viewer_vote(vote);
      }
      T::save_score(&ctx.cache, id, score).await;
      ctx
        .cache
        .put_vote(T::vote_subject(), id, &ctx.viewer_id, vote)
        .await;
    }
    Snapshot::Replaced(previous) => {
      if let Some(item) = find_mut(list, id) {
        *item = previous.clone();
      }
      previous.save(&ctx.cache).await;
    }
    Snapshot::Removed { index, item } => {
      let at = index.min(list.len());
      list.insert(at, item.clone());
      item.save(&ctx.cache).await;
    }
    Snapshot::Inserted => {
      list.retain(|item| item.cache_key() != id);
      T::forget(&ctx.cache, id).await;
    }
  }
}
