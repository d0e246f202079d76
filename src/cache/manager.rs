//! Background access to the local store.
//!
//! `CacheManager` is the only thing that touches `LocalStore`. Every call runs
//! on a blocking worker gated by a fixed number of permits, and its result is
//! handed back through the awaited join handle, so the caller's task is the
//! only one that ever sees the data. Store errors stop here: they are logged
//! and the wrapper returns the "nothing cached" value.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use super::storage::LocalStore;
use super::traits::{CacheKey, Cacheable};
use crate::model::{
  now_millis, CacheMetadata, Comment, Report, UserProfile, Vote, VoteRecord, VoteSubject,
};

/// Default number of store workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Separates item fingerprints inside the digest input.
const RECORD_SEP: u8 = 0x1e;

/// Async, failure-absorbing facade over [`LocalStore`].
#[derive(Clone)]
pub struct CacheManager {
  store: Arc<LocalStore>,
  workers: Arc<Semaphore>,
  worker_count: usize,
}

impl CacheManager {
  pub fn new(store: LocalStore, workers: usize) -> Self {
    let worker_count = workers.max(1);
    Self {
      store: Arc::new(store),
      workers: Arc::new(Semaphore::new(worker_count)),
      worker_count,
    }
  }

  /// Run one store call on a worker. `None` means the call failed or the
  /// manager is closed; the failure has already been logged.
  async fn run<R, F>(&self, op: &'static str, f: F) -> Option<R>
  where
    R: Send + 'static,
    F: FnOnce(&LocalStore) -> color_eyre::Result<R> + Send + 'static,
  {
    let permit = match Arc::clone(&self.workers).acquire_owned().await {
      Ok(permit) => permit,
      Err(_) => {
        debug!(op, "cache manager closed, skipping store call");
        return None;
      }
    };

    let store = Arc::clone(&self.store);
    let joined = tokio::task::spawn_blocking(move || {
      let _permit = permit;
      f(&store)
    })
    .await;

    match joined {
      Ok(Ok(value)) => Some(value),
      Ok(Err(e)) => {
        warn!(op, error = %e, "local store call failed");
        None
      }
      Err(e) => {
        error!(op, error = %e, "cache worker did not complete");
        None
      }
    }
  }

  /// Wait for in-flight store calls, then refuse new ones.
  pub async fn close(&self) {
    let count = u32::try_from(self.worker_count).unwrap_or(u32::MAX);
    match self.workers.acquire_many(count).await {
      Ok(_all) => self.workers.close(),
      Err(_) => debug!("cache manager already closed"),
    }
  }

  // ==========================================================================
  // Hashing and staleness
  // ==========================================================================

  /// Content hash of a collection.
  ///
  /// Item fingerprints are sorted before digesting, so the result does not
  /// depend on the order the server returned items in.
  pub fn hash<T: Cacheable>(items: &[T]) -> String {
    let mut prints: Vec<String> = items.iter().map(Cacheable::fingerprint).collect();
    prints.sort_unstable();

    let mut hasher = Sha256::new();
    for print in &prints {
      hasher.update(print.as_bytes());
      hasher.update([RECORD_SEP]);
    }
    hex::encode(hasher.finalize())
  }

  /// True when `key` has no metadata row or its last write is older than `ttl`.
  pub async fn is_stale(&self, key: &CacheKey, ttl: Duration) -> bool {
    match self.last_updated(key).await {
      Some(written_at) => expired(written_at, ttl),
      None => true,
    }
  }

  /// Profiles are aged by their own `cached_at`, not by a metadata row.
  pub async fn is_profile_stale(&self, user_id: &str, ttl: Duration) -> bool {
    match self.profile(user_id).await {
      Some(profile) => expired(profile.cached_at, ttl),
      None => true,
    }
  }

  // ==========================================================================
  // Metadata
  // ==========================================================================

  /// Record a fresh write of `key` at the current time.
  pub async fn put_metadata(&self, key: &CacheKey, hash: String, item_count: usize) {
    let key = key.to_string();
    let count = i64::try_from(item_count).unwrap_or(i64::MAX);
    self
      .run("put_metadata", move |s| s.put_metadata(&key, &hash, now_millis(), count))
      .await;
  }

  pub async fn metadata(&self, key: &CacheKey) -> Option<CacheMetadata> {
    let key = key.to_string();
    self.run("metadata", move |s| s.metadata(&key)).await.flatten()
  }

  /// Stored hash for `key`. An empty hash (explicit invalidation) reads as `None`.
  pub async fn local_hash(&self, key: &CacheKey) -> Option<String> {
    let key = key.to_string();
    self
      .run("local_hash", move |s| s.hash(&key))
      .await
      .flatten()
      .filter(|h| !h.is_empty())
  }

  /// Unix millis of the last write of `key`.
  pub async fn last_updated(&self, key: &CacheKey) -> Option<i64> {
    let key = key.to_string();
    self
      .run("last_updated", move |s| s.last_updated(&key))
      .await
      .flatten()
  }

  /// Rewrite the metadata row for `key` with an empty hash so the next read
  /// refetches. Write time and item count are kept.
  pub async fn clear_hash(&self, key: &CacheKey) {
    let key = key.to_string();
    self
      .run("clear_hash", move |s| {
        let (last_updated, count) = s
          .metadata(&key)?
          .map(|m| (m.last_updated, m.item_count))
          .unwrap_or((0, 0));
        s.put_metadata(&key, "", last_updated, count)
      })
      .await;
  }

  pub async fn all_metadata(&self) -> Vec<CacheMetadata> {
    self
      .run("all_metadata", |s| s.all_metadata())
      .await
      .unwrap_or_default()
  }

  pub async fn delete_metadata(&self, key: &CacheKey) {
    let key = key.to_string();
    self
      .run("delete_metadata", move |s| s.delete_metadata(&key))
      .await;
  }

  // ==========================================================================
  // Reports
  // ==========================================================================

  pub async fn reports(&self) -> Vec<Report> {
    self.run("reports", |s| s.reports()).await.unwrap_or_default()
  }

  pub async fn report(&self, id: &str) -> Option<Report> {
    let id = id.to_string();
    self.run("report", move |s| s.report(&id)).await.flatten()
  }

  pub async fn report_count(&self) -> i64 {
    self
      .run("report_count", |s| s.report_count())
      .await
      .unwrap_or_default()
  }

  pub async fn replace_reports(&self, reports: Vec<Report>) {
    self
      .run("replace_reports", move |s| s.replace_reports(&reports))
      .await;
  }

  pub async fn upsert_report(&self, report: Report) {
    self
      .run("upsert_report", move |s| s.upsert_report(&report))
      .await;
  }

  pub async fn upsert_reports(&self, reports: Vec<Report>) {
    self
      .run("upsert_reports", move |s| s.upsert_reports(&reports))
      .await;
  }

  pub async fn delete_report(&self, id: &str) {
    let id = id.to_string();
    self.run("delete_report", move |s| s.delete_report(&id)).await;
  }

  pub async fn delete_all_reports(&self) {
    self
      .run("delete_all_reports", |s| s.delete_all_reports())
      .await;
  }

  pub async fn update_report_score(&self, id: &str, score: i64) {
    let id = id.to_string();
    self
      .run("update_report_score", move |s| s.update_report_score(&id, score))
      .await;
  }

  pub async fn update_report_comment_count(&self, id: &str, count: i64) {
    let id = id.to_string();
    self
      .run("update_report_comment_count", move |s| {
        s.update_report_comment_count(&id, count)
      })
      .await;
  }

  pub async fn update_report_fields(&self, report: Report) {
    self
      .run("update_report_fields", move |s| s.update_report_fields(&report))
      .await;
  }

  // ==========================================================================
  // Comments
  // ==========================================================================

  pub async fn comments_for(&self, report_id: &str) -> Vec<Comment> {
    let report_id = report_id.to_string();
    self
      .run("comments_for", move |s| s.comments_for(&report_id))
      .await
      .unwrap_or_default()
  }

  pub async fn comment(&self, id: &str) -> Option<Comment> {
    let id = id.to_string();
    self.run("comment", move |s| s.comment(&id)).await.flatten()
  }

  pub async fn replace_comments(&self, report_id: &str, comments: Vec<Comment>) {
    let report_id = report_id.to_string();
    self
      .run("replace_comments", move |s| {
        s.replace_comments(&report_id, &comments)
      })
      .await;
  }

  pub async fn upsert_comment(&self, comment: Comment) {
    self
      .run("upsert_comment", move |s| s.upsert_comment(&comment))
      .await;
  }

  pub async fn upsert_comments(&self, comments: Vec<Comment>) {
    self
      .run("upsert_comments", move |s| s.upsert_comments(&comments))
      .await;
  }

  /// Number of cached comments on one report.
  pub async fn comment_count(&self, report_id: &str) -> i64 {
    let report_id = report_id.to_string();
    self
      .run("comment_count", move |s| s.comment_count(&report_id))
      .await
      .unwrap_or_default()
  }

  pub async fn delete_comment(&self, id: &str) {
    let id = id.to_string();
    self.run("delete_comment", move |s| s.delete_comment(&id)).await;
  }

  pub async fn delete_all_comments(&self) {
    self
      .run("delete_all_comments", |s| s.delete_all_comments())
      .await;
  }

  pub async fn update_comment_score(&self, id: &str, score: i64) {
    let id = id.to_string();
    self
      .run("update_comment_score", move |s| s.update_comment_score(&id, score))
      .await;
  }

  pub async fn update_comment_content(&self, id: &str, content: &str) {
    let id = id.to_string();
    let content = content.to_string();
    self
      .run("update_comment_content", move |s| {
        s.update_comment_content(&id, &content)
      })
      .await;
  }

  // ==========================================================================
  // Profiles
  // ==========================================================================

  pub async fn profile(&self, user_id: &str) -> Option<UserProfile> {
    let user_id = user_id.to_string();
    self.run("profile", move |s| s.profile(&user_id)).await.flatten()
  }

  pub async fn upsert_profile(&self, profile: UserProfile) {
    self
      .run("upsert_profile", move |s| s.upsert_profile(&profile))
      .await;
  }

  pub async fn delete_profile(&self, user_id: &str) {
    let user_id = user_id.to_string();
    self
      .run("delete_profile", move |s| s.delete_profile(&user_id))
      .await;
  }

  pub async fn update_profile_name(&self, user_id: &str, name: &str) {
    let (user_id, name) = (user_id.to_string(), name.to_string());
    self
      .run("update_profile_name", move |s| s.update_profile_name(&user_id, &name))
      .await;
  }

  pub async fn update_profile_phone(&self, user_id: &str, phone: &str) {
    let (user_id, phone) = (user_id.to_string(), phone.to_string());
    self
      .run("update_profile_phone", move |s| {
        s.update_profile_phone(&user_id, &phone)
      })
      .await;
  }

  pub async fn update_profile_avatar(&self, user_id: &str, url: &str) {
    let (user_id, url) = (user_id.to_string(), url.to_string());
    self
      .run("update_profile_avatar", move |s| {
        s.update_profile_avatar(&user_id, &url)
      })
      .await;
  }

  // ==========================================================================
  // Votes
  // ==========================================================================

  /// The viewer's cached votes in one table, keyed by subject id.
  pub async fn viewer_votes(&self, subject: VoteSubject, voter_id: &str) -> HashMap<String, Vote> {
    let voter_id = voter_id.to_string();
    self
      .run("viewer_votes", move |s| s.votes_for_user(subject, &voter_id))
      .await
      .unwrap_or_default()
      .into_iter()
      .map(|r| (r.subject_id, r.vote))
      .collect()
  }

  /// One cached vote. A missing row reads as no vote.
  pub async fn vote(&self, subject: VoteSubject, subject_id: &str, voter_id: &str) -> Vote {
    let (subject_id, voter_id) = (subject_id.to_string(), voter_id.to_string());
    self
      .run("vote", move |s| s.vote(subject, &subject_id, &voter_id))
      .await
      .flatten()
      .unwrap_or_default()
  }

  pub async fn put_vote(
    &self,
    subject: VoteSubject,
    subject_id: &str,
    voter_id: &str,
    vote: Vote,
  ) {
    let record = VoteRecord {
      subject_id: subject_id.to_string(),
      voter_id: voter_id.to_string(),
      vote,
      cached_at: now_millis(),
    };
    self
      .run("put_vote", move |s| s.upsert_vote(subject, &record))
      .await;
  }

  pub async fn put_votes(
    &self,
    subject: VoteSubject,
    voter_id: &str,
    votes: HashMap<String, Vote>,
  ) {
    if votes.is_empty() {
      return;
    }
    let now = now_millis();
    let records: Vec<VoteRecord> = votes
      .into_iter()
      .map(|(subject_id, vote)| VoteRecord {
        subject_id,
        voter_id: voter_id.to_string(),
        vote,
        cached_at: now,
      })
      .collect();
    self
      .run("put_votes", move |s| s.upsert_votes(subject, &records))
      .await;
  }

  pub async fn delete_votes_for_user(&self, subject: VoteSubject, voter_id: &str) {
    let voter_id = voter_id.to_string();
    self
      .run("delete_votes_for_user", move |s| {
        s.delete_votes_for_user(subject, &voter_id)
      })
      .await;
  }

  /// Wipe every table.
  pub async fn clear_all(&self) {
    self.run("clear_all", |s| s.clear_all()).await;
  }
}

fn expired(written_at: i64, ttl: Duration) -> bool {
  let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
  now_millis().saturating_sub(written_at) > ttl_ms
}
