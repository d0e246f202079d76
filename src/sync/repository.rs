//! The sync repository: cache-first reads and optimistic writes.
//!
//! Every collection read follows the same path:
//!
//! 1. A dirty flag on the collection skips the cache and forces a fetch
//! 2. Otherwise cached rows go out immediately as `CacheHit`
//! 3. The server checksum is compared with the stored hash; without a
//!    checksum the TTL decides
//! 4. On mismatch the collection is fetched, stored and re-hashed
//! 5. Data goes out with the viewer's cached votes applied, then the votes are
//!    refreshed from the server and the data goes out again if any changed

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::invalidation::{mark_dirty, Invalidation};
use super::mutation::{
  provisional_score, toggle_vote, Ack, CommentCount, FollowUp, MutationContext, MutationKind,
  PendingMutation, Request, Snapshot, SyncEntity,
};
use super::read::{self, Emitter, ReadStream};
use crate::cache::{CacheKey, CacheManager, CacheSource, Cacheable, LocalStore, Votable};
use crate::config::{Config, SyncConfig};
use crate::error::SyncError;
use crate::model::{
  now_millis, Comment, Report, ReportDraft, ReportStatus, UserProfile, Vote, VoteDirection,
  VoteSubject,
};
use crate::remote::{RemoteClient, RemoteError};

/// A cached collection the read protocol can run against.
#[async_trait]
trait Collection: Send + Sync + 'static {
  type Item: SyncEntity;

  fn key(&self) -> CacheKey;

  fn ttl(&self, config: &SyncConfig) -> Duration;

  async fn cached(&self, cache: &CacheManager) -> Vec<Self::Item>;

  async fn replace(&self, cache: &CacheManager, items: Vec<Self::Item>);

  /// Fetch from the server, newest first.
  async fn fetch(&self, remote: &dyn RemoteClient) -> Result<Vec<Self::Item>, RemoteError>;
}

struct AllReports;

#[async_trait]
impl Collection for AllReports {
  type Item = Report;

  fn key(&self) -> CacheKey {
    CacheKey::Reports
  }

  fn ttl(&self, config: &SyncConfig) -> Duration {
    config.reports_ttl
  }

  async fn cached(&self, cache: &CacheManager) -> Vec<Report> {
    cache.reports().await
  }

  async fn replace(&self, cache: &CacheManager, items: Vec<Report>) {
    cache.replace_reports(items).await;
  }

  async fn fetch(&self, remote: &dyn RemoteClient) -> Result<Vec<Report>, RemoteError> {
    let mut reports = remote.fetch_reports().await?;
    reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(reports)
  }
}

struct ReportComments(String);

#[async_trait]
impl Collection for ReportComments {
  type Item = Comment;

  fn key(&self) -> CacheKey {
    CacheKey::comments(&self.0)
  }

  fn ttl(&self, config: &SyncConfig) -> Duration {
    config.comments_ttl
  }

  async fn cached(&self, cache: &CacheManager) -> Vec<Comment> {
    cache.comments_for(&self.0).await
  }

  async fn replace(&self, cache: &CacheManager, items: Vec<Comment>) {
    cache.replace_comments(&self.0, items).await;
  }

  async fn fetch(&self, remote: &dyn RemoteClient) -> Result<Vec<Comment>, RemoteError> {
    let mut comments = remote.fetch_comments(&self.0).await?;
    comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(comments)
  }
}

enum Validation {
  /// Cached rows are current
  Current(CacheSource),
  /// Fetch, recording this server checksum if there is one
  Refetch(Option<String>),
}

struct Inner {
  cache: CacheManager,
  remote: Arc<dyn RemoteClient>,
  config: SyncConfig,
  invalidation: Arc<Invalidation>,
  viewer: RwLock<Option<String>>,
  provisional_seq: AtomicU64,
}

impl Inner {
  fn viewer(&self) -> Option<String> {
    self
      .viewer
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn set_viewer(&self, viewer: Option<String>) -> Option<String> {
    let mut slot = self.viewer.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *slot, viewer)
  }

  async fn read_collection<C: Collection>(&self, collection: C, mut out: Emitter<C::Item>) {
    let key = collection.key();
    let viewer = self.viewer();

    let forced = self.invalidation.take(&key);
    let cached = if forced {
      debug!(%key, "Collection invalidated, skipping cache");
      Vec::new()
    } else {
      let mut rows = collection.cached(&self.cache).await;
      if !rows.is_empty() {
        self.overlay_cached_votes(&mut rows, viewer.as_deref()).await;
        debug!(%key, count = rows.len(), "Serving cached rows");
        out.cache_hit(rows.clone());
      }
      rows
    };
    out.loading();

    // A checksum left by navigation is still the server's word for this key
    let known_checksum = if forced {
      self.invalidation.take_checksum(&key)
    } else {
      match self.validate(&collection, &key, &cached).await {
        Validation::Current(source) => {
          self.deliver(cached, source, viewer, out).await;
          return;
        }
        Validation::Refetch(checksum) => checksum,
      }
    };

    match collection.fetch(self.remote.as_ref()).await {
      Ok(fresh) => {
        let hash = known_checksum.unwrap_or_else(|| CacheManager::hash(&fresh));
        info!(%key, count = fresh.len(), "Fetched collection from remote");
        collection.replace(&self.cache, fresh.clone()).await;
        self.cache.put_metadata(&key, hash, fresh.len()).await;
        self.deliver(fresh, CacheSource::Network, viewer, out).await;
      }
      Err(e) if out.had_cache_hit() => {
        warn!(%key, error = %e, "Remote fetch failed, keeping cached rows");
        out.finish();
      }
      Err(e) => {
        warn!(%key, error = %e, "Remote fetch failed with nothing cached");
        out.fail(e.into());
        out.finish();
      }
    }
  }

  async fn validate<C: Collection>(
    &self,
    collection: &C,
    key: &CacheKey,
    cached: &[C::Item],
  ) -> Validation {
    let remote_checksum = match self.invalidation.take_checksum(key) {
      Some(checksum) => {
        debug!(%key, "Reusing checksum from navigation");
        Ok(Some(checksum))
      }
      None => self.remote.fetch_checksum(key).await,
    };

    match remote_checksum {
      Ok(Some(remote)) => {
        let local = self.cache.local_hash(key).await;
        if cached.is_empty() || local.as_deref() != Some(remote.as_str()) {
          debug!(%key, "Checksum mismatch");
          Validation::Refetch(Some(remote))
        } else {
          debug!(%key, "Checksum matches cache");
          Validation::Current(CacheSource::CacheFresh)
        }
      }
      other => {
        match other {
          Err(e) => debug!(%key, error = %e, "Checksum unavailable, using TTL"),
          Ok(_) => debug!(%key, "Server has no checksum, using TTL"),
        }
        // A blanked hash marks the rows dirty whatever their age
        let ttl = collection.ttl(&self.config);
        if cached.is_empty()
          || self.cache.local_hash(key).await.is_none()
          || self.cache.is_stale(key, ttl).await
        {
          Validation::Refetch(None)
        } else {
          Validation::Current(CacheSource::CacheWithinTtl)
        }
      }
    }
  }

  /// Emit `items` with cached votes, finish loading, then refresh the votes
  /// from the server and emit again if anything moved.
  async fn deliver<T: SyncEntity>(
    &self,
    mut items: Vec<T>,
    source: CacheSource,
    viewer: Option<String>,
    mut out: Emitter<T>,
  ) {
    self.overlay_cached_votes(&mut items, viewer.as_deref()).await;
    out.fresh(items.clone(), source);
    out.finish();

    let Some(viewer) = viewer else { return };
    if items.is_empty() {
      return;
    }

    let ids: Vec<String> = items.iter().map(|i| i.cache_key().to_string()).collect();
    let remote_votes = match self
      .remote
      .fetch_viewer_votes(T::vote_subject(), &ids, &viewer)
      .await
    {
      Ok(votes) => votes,
      Err(e) => {
        debug!(error = %e, "Viewer vote refresh failed");
        return;
      }
    };

    // Ids the server left out carry no vote
    let votes: HashMap<String, Vote> = ids
      .into_iter()
      .map(|id| {
        let vote = remote_votes.get(&id).copied().unwrap_or(Vote::NONE);
        (id, vote)
      })
      .collect();

    let mut changed = false;
    for item in &mut items {
      let vote = votes.get(item.cache_key()).copied().unwrap_or(Vote::NONE);
      if vote != item.viewer_vote() {
        item.set_viewer_vote(vote);
        changed = true;
      }
    }
    self.cache.put_votes(T::vote_subject(), &viewer, votes).await;

    if changed {
      debug!(entity = T::entity_type(), "Viewer votes changed, re-emitting");
      out.fresh(items, source);
    }
  }

  async fn overlay_cached_votes<T: Votable>(&self, items: &mut [T], viewer: Option<&str>) {
    let Some(viewer) = viewer else { return };
    let votes = self.cache.viewer_votes(T::vote_subject(), viewer).await;
    for item in items {
      item.set_viewer_vote(votes.get(item.cache_key()).copied().unwrap_or(Vote::NONE));
    }
  }

  async fn read_profile(&self, user_id: String, mut out: Emitter<UserProfile>) {
    let cached = self.cache.profile(&user_id).await;
    if let Some(profile) = &cached {
      if !self
        .cache
        .is_profile_stale(&user_id, self.config.profile_ttl)
        .await
      {
        out.loading();
        out.fresh(vec![profile.clone()], CacheSource::CacheWithinTtl);
        out.finish();
        return;
      }
      out.cache_hit(vec![profile.clone()]);
    }
    out.loading();

    match self.remote.fetch_user_profile(&user_id).await {
      Ok(mut profile) => {
        // The profile call does not return these
        if let Some(previous) = cached {
          profile.email = profile.email.or(previous.email);
          profile.avatar_url = profile.avatar_url.or(previous.avatar_url);
        }
        profile.cached_at = now_millis();
        self.cache.upsert_profile(profile.clone()).await;
        out.fresh(vec![profile], CacheSource::Network);
      }
      Err(e) if out.had_cache_hit() => {
        warn!(%user_id, error = %e, "Profile fetch failed, keeping cached profile");
      }
      Err(e) => {
        warn!(%user_id, error = %e, "Profile fetch failed");
        out.fail(e.into());
      }
    }
    out.finish();
  }
}

/// Cache-first access to reports, comments and profiles.
///
/// Cheap to clone; clones share the cache, the remote client and the
/// invalidation state.
#[derive(Clone)]
pub struct SyncRepository {
  inner: Arc<Inner>,
}

impl SyncRepository {
  pub fn new(cache: CacheManager, remote: Arc<dyn RemoteClient>, config: SyncConfig) -> Self {
    let invalidation = Arc::new(Invalidation::new(config.checksum_throttle));
    Self {
      inner: Arc::new(Inner {
        cache,
        remote,
        config,
        invalidation,
        viewer: RwLock::new(None),
        provisional_seq: AtomicU64::new(0),
      }),
    }
  }

  /// Open the store named by `config` and build a repository on it.
  pub fn open(config: &Config, remote: Arc<dyn RemoteClient>) -> color_eyre::Result<Self> {
    let store = match &config.cache.path {
      Some(path) => LocalStore::open_at(path)?,
      None => LocalStore::open()?,
    };
    let sync = config.sync_config();
    let cache = CacheManager::new(store, sync.workers);
    Ok(Self::new(cache, remote, sync))
  }

  /// Wait for queued store work and stop accepting more.
  pub async fn close(&self) {
    self.inner.cache.close().await;
    info!("Sync repository closed");
  }

  pub fn cache(&self) -> &CacheManager {
    &self.inner.cache
  }

  pub fn viewer(&self) -> Option<String> {
    self.inner.viewer()
  }

  fn require_viewer(&self) -> Result<String, SyncError> {
    self.inner.viewer().ok_or(SyncError::NotSignedIn)
  }

  fn context(&self, viewer_id: String) -> MutationContext {
    MutationContext {
      cache: self.inner.cache.clone(),
      invalidation: Arc::clone(&self.inner.invalidation),
      viewer_id,
    }
  }

  fn provisional_id(&self) -> String {
    let seq = self.inner.provisional_seq.fetch_add(1, Ordering::Relaxed);
    format!("local-{}-{}", now_millis(), seq)
  }

  // ==========================================================================
  // Session
  // ==========================================================================

  /// Make `viewer_id` the current viewer and preload their votes. A failed
  /// preload is logged; the votes fill in as reads refresh them.
  pub async fn sign_in(&self, viewer_id: &str) {
    if let Some(previous) = self.inner.set_viewer(Some(viewer_id.to_string())) {
      if previous != viewer_id {
        for subject in [VoteSubject::Report, VoteSubject::Comment] {
          self.inner.cache.delete_votes_for_user(subject, &previous).await;
        }
      }
    }
    info!(viewer = viewer_id, "Signed in");

    if let Err(e) = self.initialize_viewer_votes().await {
      warn!(error = %e, "Failed to preload viewer votes");
    }
  }

  /// Load every vote the viewer has cast into both vote tables.
  pub async fn initialize_viewer_votes(&self) -> Result<(), SyncError> {
    let viewer = self.require_viewer()?;
    let remote = &self.inner.remote;
    let (report_votes, comment_votes) = futures::try_join!(
      remote.fetch_all_viewer_votes(VoteSubject::Report, &viewer),
      remote.fetch_all_viewer_votes(VoteSubject::Comment, &viewer),
    )?;

    info!(
      reports = report_votes.len(),
      comments = comment_votes.len(),
      "Loaded viewer votes"
    );
    let cache = &self.inner.cache;
    cache.put_votes(VoteSubject::Report, &viewer, report_votes).await;
    cache.put_votes(VoteSubject::Comment, &viewer, comment_votes).await;
    Ok(())
  }

  /// Forget the viewer and wipe everything cached.
  pub async fn sign_out(&self) {
    self.inner.set_viewer(None);
    self.inner.invalidation.clear();
    self.inner.cache.clear_all().await;
    info!("Signed out, local cache wiped");
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  fn spawn_read<C: Collection>(&self, collection: C) -> ReadStream<C::Item> {
    let (out, stream) = read::channel();
    let inner = Arc::clone(&self.inner);
    tokio::spawn(async move { inner.read_collection(collection, out).await });
    stream
  }

  /// Every report, newest first.
  pub fn reports(&self) -> ReadStream<Report> {
    self.spawn_read(AllReports)
  }

  /// Comments of one report, newest first.
  pub fn comments(&self, report_id: &str) -> ReadStream<Comment> {
    self.spawn_read(ReportComments(report_id.to_string()))
  }

  /// Reports authored by the viewer. Fails immediately when signed out.
  pub fn user_reports(&self) -> ReadStream<Report> {
    match self.inner.viewer() {
      Some(viewer) => self.reports().filter(move |r| r.author_id == viewer),
      None => {
        let (out, stream) = read::channel();
        out.fail(SyncError::NotSignedIn);
        stream
      }
    }
  }

  /// One user's profile. Only the TTL decides whether it is refetched.
  pub fn user_profile(&self, user_id: &str) -> ReadStream<UserProfile> {
    let (out, stream) = read::channel();
    let inner = Arc::clone(&self.inner);
    let user_id = user_id.to_string();
    tokio::spawn(async move { inner.read_profile(user_id, out).await });
    stream
  }

  // ==========================================================================
  // Invalidation
  // ==========================================================================

  /// Fetch every checksum and flag the cached collections that disagree.
  ///
  /// Calls closer together than the throttle window return an empty list
  /// without touching the network. A failed checksum fetch also reports
  /// nothing invalidated; each read still validates on its own. Fetched
  /// checksums are kept for the next read of each collection.
  pub async fn validate_on_navigation(&self) -> Vec<CacheKey> {
    if !self.inner.invalidation.begin_validation(Instant::now()) {
      debug!("Navigation validation throttled");
      return Vec::new();
    }

    let checksums = match self.inner.remote.fetch_checksums().await {
      Ok(checksums) => checksums,
      Err(e) => {
        warn!(error = %e, "Navigation checksum fetch failed");
        return Vec::new();
      }
    };
    let mut invalidated = Vec::new();
    for (raw_key, checksum) in &checksums {
      let Some(key) = CacheKey::parse(raw_key) else {
        continue;
      };
      // Never-synced collections fetch on first read anyway
      let Some(meta) = self.inner.cache.metadata(&key).await else {
        continue;
      };
      if meta.hash != *checksum {
        mark_dirty(&self.inner.invalidation, &self.inner.cache, &key).await;
        invalidated.push(key);
      }
    }
    self.inner.invalidation.store_checksums(checksums);

    invalidated.sort();
    if !invalidated.is_empty() {
      info!(count = invalidated.len(), "Navigation found changed collections");
    }
    invalidated
  }

  pub async fn invalidate_reports(&self) {
    self.invalidate(&CacheKey::Reports).await;
  }

  pub async fn invalidate_comments(&self, report_id: &str) {
    self.invalidate(&CacheKey::comments(report_id)).await;
  }

  /// Flag `key` dirty and blank its stored hash.
  pub async fn invalidate(&self, key: &CacheKey) {
    mark_dirty(&self.inner.invalidation, &self.inner.cache, key).await;
    debug!(%key, "Invalidated");
  }

  // ==========================================================================
  // Votes
  // ==========================================================================

  pub async fn vote_report(
    &self,
    reports: &mut [Report],
    report_id: &str,
    direction: VoteDirection,
  ) -> Result<PendingMutation<Report>, SyncError> {
    self.vote(reports, report_id, direction).await
  }

  pub async fn vote_comment(
    &self,
    comments: &mut [Comment],
    comment_id: &str,
    direction: VoteDirection,
  ) -> Result<PendingMutation<Comment>, SyncError> {
    self.vote(comments, comment_id, direction).await
  }

  async fn vote<T: SyncEntity>(
    &self,
    list: &mut [T],
    id: &str,
    direction: VoteDirection,
  ) -> Result<PendingMutation<T>, SyncError> {
    let viewer = self.require_viewer()?;
    let item = list
      .iter_mut()
      .find(|i| i.cache_key() == id)
      .ok_or_else(|| SyncError::not_found(T::entity_type(), id))?;

    let current = item.viewer_vote();
    let old_score = item.score();
    let new_vote = toggle_vote(current, direction);
    let new_score = provisional_score(old_score, current, new_vote);
    item.set_viewer_vote(new_vote);
    item.set_score(new_score);
    debug!(entity = T::entity_type(), id, old_score, new_score, "Applied vote");

    let cache = &self.inner.cache;
    T::save_score(cache, id, new_score).await;
    cache.put_vote(T::vote_subject(), id, &viewer, new_vote).await;

    let remote = Arc::clone(&self.inner.remote);
    let (subject_id, voter) = (id.to_string(), viewer.clone());
    let request: Request = async move {
      remote
        .vote(T::vote_subject(), &subject_id, &voter, new_vote)
        .await
        .map(Ack::Vote)
    }
    .boxed();

    Ok(PendingMutation::new(
      self.context(viewer),
      MutationKind::Vote,
      id,
      Snapshot::Vote {
        score: old_score,
        vote: current,
      },
      request,
    ))
  }

  // ==========================================================================
  // Shared edit / delete paths
  // ==========================================================================

  async fn apply_edit<T, E, R>(
    &self,
    list: &mut [T],
    id: &str,
    kind: MutationKind,
    edit: E,
    request: R,
  ) -> Result<PendingMutation<T>, SyncError>
  where
    T: SyncEntity,
    E: FnOnce(&mut T),
    R: FnOnce(Arc<dyn RemoteClient>, String, &T) -> Request,
  {
    let viewer = self.require_viewer()?;
    let item = list
      .iter_mut()
      .find(|i| i.cache_key() == id)
      .ok_or_else(|| SyncError::not_found(T::entity_type(), id))?;

    let previous = item.clone();
    edit(item);
    let edited = item.clone();
    edited.save_fields(&self.inner.cache).await;
    debug!(%kind, entity = T::entity_type(), id, "Applied edit");

    let request = request(Arc::clone(&self.inner.remote), viewer.clone(), &edited);
    Ok(
      PendingMutation::new(
        self.context(viewer),
        kind,
        id,
        Snapshot::Replaced(previous),
        request,
      )
      .invalidating(vec![edited.collection()]),
    )
  }

  async fn apply_delete<T, R>(
    &self,
    list: &mut Vec<T>,
    id: &str,
    request: R,
  ) -> Result<PendingMutation<T>, SyncError>
  where
    T: SyncEntity,
    R: FnOnce(Arc<dyn RemoteClient>, String) -> Request,
  {
    let viewer = self.require_viewer()?;
    let index = list
      .iter()
      .position(|i| i.cache_key() == id)
      .ok_or_else(|| SyncError::not_found(T::entity_type(), id))?;

    let item = list.remove(index);
    T::forget(&self.inner.cache, id).await;
    debug!(entity = T::entity_type(), id, index, "Applied delete");

    let collection = item.collection();
    let request = request(Arc::clone(&self.inner.remote), viewer.clone());
    Ok(
      PendingMutation::new(
        self.context(viewer),
        MutationKind::Delete,
        id,
        Snapshot::Removed { index, item },
        request,
      )
      .invalidating(vec![collection]),
    )
  }

  // ==========================================================================
  // Reports
  // ==========================================================================

  /// Insert a provisional report at the top of `reports`. When settled, the
  /// server id replaces the provisional one and `photo_base64`, if given, is
  /// uploaded; its outcome is reported in [`Settled::photo`](super::Settled).
  pub async fn submit_report(
    &self,
    reports: &mut Vec<Report>,
    draft: ReportDraft,
    photo_base64: Option<String>,
  ) -> Result<PendingMutation<Report>, SyncError> {
    let viewer = self.require_viewer()?;
    let profile = self.inner.cache.profile(&viewer).await;
    let now = now_millis();

    let report = Report {
      id: self.provisional_id(),
      description: draft.description.clone(),
      category: draft.category.clone(),
      authority: draft.authority.clone(),
      location: draft.location.clone(),
      latitude: draft.latitude,
      longitude: draft.longitude,
      status: ReportStatus::Submitted,
      photo_url: None,
      author_id: viewer.clone(),
      author_name: profile
        .as_ref()
        .and_then(|p| p.name.clone())
        .unwrap_or_default(),
      author_avatar_url: profile.and_then(|p| p.avatar_url),
      votes: 0,
      score: 0,
      created_at: now,
      comment_count: 0,
      viewer_vote: Vote::NONE,
      cached_at: now,
    };
    reports.insert(0, report.clone());
    report.save(&self.inner.cache).await;
    debug!(id = %report.id, "Inserted provisional report");

    let remote = Arc::clone(&self.inner.remote);
    let voter = viewer.clone();
    let request: Request = async move {
      remote
        .submit_report(&draft, &voter)
        .await
        .map(Ack::Created)
    }
    .boxed();

    let follow_up = photo_base64.map(|image| {
      let remote = Arc::clone(&self.inner.remote);
      let upload: FollowUp = Box::new(move |report_id: String| {
        async move { remote.upload_report_photo(&report_id, &image).await }.boxed()
      });
      upload
    });

    Ok(
      PendingMutation::new(
        self.context(viewer),
        MutationKind::Submit,
        &report.id,
        Snapshot::Inserted,
        request,
      )
      .invalidating(vec![CacheKey::Reports])
      .with_follow_up(follow_up),
    )
  }

  pub async fn edit_report(
    &self,
    reports: &mut [Report],
    report_id: &str,
    draft: ReportDraft,
  ) -> Result<PendingMutation<Report>, SyncError> {
    let fields = draft.clone();
    self
      .apply_edit(
        reports,
        report_id,
        MutationKind::Edit,
        move |report| fields.apply_to(report),
        move |remote, viewer, edited| {
          let (id, status) = (edited.id.clone(), edited.status);
          async move {
            remote
              .edit_report(&id, &viewer, &draft, status)
              .await
              .map(|_| Ack::Done)
          }
          .boxed()
        },
      )
      .await
  }

  /// Admin status change; rolls back like an edit.
  pub async fn update_report_status(
    &self,
    reports: &mut [Report],
    report_id: &str,
    status: ReportStatus,
  ) -> Result<PendingMutation<Report>, SyncError> {
    self
      .apply_edit(
        reports,
        report_id,
        MutationKind::StatusChange,
        move |report| report.status = status,
        move |remote, viewer, edited| {
          let id = edited.id.clone();
          async move {
            remote
              .update_report_status(&id, &viewer, status)
              .await
              .map(|_| Ack::Done)
          }
          .boxed()
        },
      )
      .await
  }

  pub async fn delete_report(
    &self,
    reports: &mut Vec<Report>,
    report_id: &str,
  ) -> Result<PendingMutation<Report>, SyncError> {
    let id = report_id.to_string();
    self
      .apply_delete(reports, report_id, move |remote, viewer| {
        async move { remote.delete_report(&id, &viewer).await.map(|_| Ack::Done) }.boxed()
      })
      .await
  }

  // ==========================================================================
  // Comments
  // ==========================================================================

  /// Move the cached comment count of `report_id` by `delta`.
  async fn shift_comment_count(&self, report_id: &str, delta: i64) -> Option<CommentCount> {
    let report = self.inner.cache.report(report_id).await?;
    let before = report.comment_count;
    let after = (before + delta).max(0);
    self
      .inner
      .cache
      .update_report_comment_count(report_id, after)
      .await;
    Some(CommentCount {
      report_id: report_id.to_string(),
      before,
      after,
    })
  }

  /// Insert a provisional comment at the top of `comments` and bump the
  /// parent's cached comment count.
  pub async fn submit_comment(
    &self,
    comments: &mut Vec<Comment>,
    report_id: &str,
    content: &str,
  ) -> Result<PendingMutation<Comment>, SyncError> {
    let viewer = self.require_viewer()?;
    let profile = self.inner.cache.profile(&viewer).await;
    let now = now_millis();

    let comment = Comment {
      id: self.provisional_id(),
      report_id: report_id.to_string(),
      content: content.to_string(),
      author_id: viewer.clone(),
      author_name: profile
        .as_ref()
        .and_then(|p| p.name.clone())
        .unwrap_or_default(),
      author_avatar_url: profile.and_then(|p| p.avatar_url),
      score: 0,
      created_at: now,
      viewer_vote: Vote::NONE,
      cached_at: now,
    };
    comments.insert(0, comment.clone());
    comment.save(&self.inner.cache).await;
    let count = self.shift_comment_count(report_id, 1).await;

    let remote = Arc::clone(&self.inner.remote);
    let (text, parent, voter) = (content.to_string(), report_id.to_string(), viewer.clone());
    let request: Request = async move {
      remote
        .submit_comment(&text, &parent, &voter)
        .await
        .map(Ack::Created)
    }
    .boxed();

    Ok(
      PendingMutation::new(
        self.context(viewer),
        MutationKind::Submit,
        &comment.id,
        Snapshot::Inserted,
        request,
      )
      .invalidating(vec![CacheKey::comments(report_id), CacheKey::Reports])
      .with_comment_count(count),
    )
  }

  pub async fn edit_comment(
    &self,
    comments: &mut [Comment],
    comment_id: &str,
    content: &str,
  ) -> Result<PendingMutation<Comment>, SyncError> {
    let text = content.to_string();
    self
      .apply_edit(
        comments,
        comment_id,
        MutationKind::Edit,
        |comment| comment.content = content.to_string(),
        move |remote, viewer, edited| {
          let id = edited.id.clone();
          async move {
            remote
              .edit_comment(&id, &viewer, &text)
              .await
              .map(|_| Ack::Done)
          }
          .boxed()
        },
      )
      .await
  }

  /// Remove a comment and lower the parent's cached comment count; both come
  /// back on rollback.
  pub async fn delete_comment(
    &self,
    comments: &mut Vec<Comment>,
    comment_id: &str,
  ) -> Result<PendingMutation<Comment>, SyncError> {
    let report_id = comments
      .iter()
      .find(|c| c.id == comment_id)
      .map(|c| c.report_id.clone())
      .ok_or_else(|| SyncError::not_found(Comment::entity_type(), comment_id))?;

    let id = comment_id.to_string();
    let pending = self
      .apply_delete(comments, comment_id, move |remote, viewer| {
        async move { remote.delete_comment(&id, &viewer).await.map(|_| Ack::Done) }.boxed()
      })
      .await?;
    let count = self.shift_comment_count(&report_id, -1).await;

    Ok(
      pending
        .invalidating(vec![CacheKey::comments(&report_id), CacheKey::Reports])
        .with_comment_count(count),
    )
  }

  // ==========================================================================
  // Profile
  // ==========================================================================
  //
  // Profile writes wait for the server. Reports embed author names and
  // avatars, so each one flags the report list dirty.

  pub async fn update_display_name(&self, name: &str) -> Result<(), SyncError> {
    let viewer = self.require_viewer()?;
    self.inner.remote.update_display_name(&viewer, name).await?;
    self.inner.cache.update_profile_name(&viewer, name).await;
    self.invalidate(&CacheKey::Reports).await;
    Ok(())
  }

  pub async fn update_phone(&self, phone: &str) -> Result<(), SyncError> {
    let viewer = self.require_viewer()?;
    self.inner.remote.update_phone(&viewer, phone).await?;
    self.inner.cache.update_profile_phone(&viewer, phone).await;
    self.invalidate(&CacheKey::Reports).await;
    Ok(())
  }

  /// Upload a new avatar and return its URL.
  pub async fn update_avatar(&self, image_base64: &str) -> Result<String, SyncError> {
    let viewer = self.require_viewer()?;
    let url = self.inner.remote.upload_avatar(&viewer, image_base64).await?;
    self.inner.cache.update_profile_avatar(&viewer, &url).await;
    self.invalidate(&CacheKey::Reports).await;
    Ok(url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::fixtures::{comment, report};
  use crate::cache::DEFAULT_WORKERS;
  use crate::remote::fake::FakeRemote;
  use crate::sync::ReadEvent;

  fn setup() -> (SyncRepository, Arc<FakeRemote>) {
    let remote = Arc::new(FakeRemote::new());
    let cache = CacheManager::new(LocalStore::open_in_memory().unwrap(), DEFAULT_WORKERS);
    let repo = SyncRepository::new(cache, remote.clone(), SyncConfig::default());
    (repo, remote)
  }

  async fn seed_reports(repo: &SyncRepository, reports: Vec<Report>, hash: &str) {
    let count = reports.len();
    repo.cache().replace_reports(reports).await;
    repo
      .cache()
      .put_metadata(&CacheKey::Reports, hash.to_string(), count)
      .await;
  }

  fn ids<T: Cacheable>(items: &[T]) -> Vec<&str> {
    items.iter().map(|i| i.cache_key()).collect()
  }

  fn draft(text: &str) -> ReportDraft {
    ReportDraft {
      description: text.to_string(),
      category: "Road".to_string(),
      authority: "Council".to_string(),
      location: "Main St".to_string(),
      latitude: 1.0,
      longitude: 2.0,
    }
  }

  #[tokio::test]
  async fn test_matching_checksum_serves_cache_without_refetch() {
    let (repo, remote) = setup();
    seed_reports(
      &repo,
      vec![report("r1", 1), report("r2", 2), report("r3", 3)],
      "h1",
    )
    .await;
    remote
      .state()
      .checksums
      .insert("reports".to_string(), "h1".to_string());

    let events = repo.reports().events().await;
    assert_eq!(events.len(), 4, "{:?}", events);
    match &events[0] {
      ReadEvent::CacheHit(items) => assert_eq!(ids(items), vec!["r3", "r2", "r1"]),
      other => panic!("expected cache hit, got {:?}", other),
    }
    assert_eq!(events[1], ReadEvent::Loading(true));
    match &events[2] {
      ReadEvent::Fresh { items, source } => {
        assert_eq!(items.len(), 3);
        assert_eq!(*source, CacheSource::CacheFresh);
      }
      other => panic!("expected fresh data, got {:?}", other),
    }
    assert_eq!(events[3], ReadEvent::Loading(false));
    assert_eq!(remote.calls("fetch_reports"), 0);
  }

  #[tokio::test]
  async fn test_empty_cache_without_checksum_fetches() {
    let (repo, remote) = setup();
    {
      let mut state = remote.state();
      state.fail_checksums = true;
      state.reports = vec![report("a", 1), report("b", 2)];
    }

    let events = repo.reports().events().await;
    assert_eq!(events.len(), 3, "{:?}", events);
    assert_eq!(events[0], ReadEvent::Loading(true));
    match &events[1] {
      ReadEvent::Fresh { items, source } => {
        assert_eq!(ids(items), vec!["b", "a"]);
        assert_eq!(*source, CacheSource::Network);
      }
      other => panic!("expected fresh data, got {:?}", other),
    }
    assert_eq!(events[2], ReadEvent::Loading(false));

    let stored = repo.cache().reports().await;
    assert_eq!(stored.len(), 2);
    assert_eq!(
      repo.cache().local_hash(&CacheKey::Reports).await,
      Some(CacheManager::hash(&stored))
    );
  }

  #[tokio::test]
  async fn test_mismatched_checksum_refetches_and_records_it() {
    let (repo, remote) = setup();
    seed_reports(&repo, vec![report("old", 1)], "h1").await;
    {
      let mut state = remote.state();
      state.checksums.insert("reports".to_string(), "h2".to_string());
      state.reports = vec![report("new", 5)];
    }

    let data = repo.reports().last_data().await.unwrap();
    assert_eq!(ids(&data), vec!["new"]);
    assert_eq!(
      repo.cache().local_hash(&CacheKey::Reports).await,
      Some("h2".to_string())
    );
    assert_eq!(remote.calls("fetch_reports"), 1);
  }

  #[tokio::test]
  async fn test_checksum_down_within_ttl_keeps_cache() {
    let (repo, remote) = setup();
    seed_reports(&repo, vec![report("r1", 1)], "h1").await;
    remote.state().fail_checksums = true;

    let events = repo.reports().events().await;
    assert!(events.iter().any(|e| matches!(
      e,
      ReadEvent::Fresh {
        source: CacheSource::CacheWithinTtl,
        ..
      }
    )));
    assert_eq!(remote.calls("fetch_reports"), 0);
  }

  #[tokio::test]
  async fn test_missing_server_checksum_falls_back_to_ttl() {
    let (repo, remote) = setup();
    repo.cache().replace_comments("r1", vec![comment("c1", "r1", 1)]).await;
    repo
      .cache()
      .put_metadata(&CacheKey::comments("r1"), "h".to_string(), 1)
      .await;

    let events = repo.comments("r1").events().await;
    assert!(events.iter().any(|e| matches!(
      e,
      ReadEvent::Fresh {
        source: CacheSource::CacheWithinTtl,
        ..
      }
    )));
    assert_eq!(remote.calls("fetch_comments"), 0);
  }

  #[tokio::test]
  async fn test_fetch_failure_with_cache_is_swallowed() {
    let (repo, remote) = setup();
    seed_reports(&repo, vec![report("r1", 1)], "h1").await;
    {
      let mut state = remote.state();
      state.checksums.insert("reports".to_string(), "h2".to_string());
      state.fail_fetch = true;
    }

    let events = repo.reports().events().await;
    assert!(matches!(events[0], ReadEvent::CacheHit(_)));
    assert!(!events.iter().any(|e| matches!(e, ReadEvent::Failed(_))));
    assert_eq!(events.last(), Some(&ReadEvent::Loading(false)));
    assert_eq!(
      events
        .iter()
        .filter(|e| **e == ReadEvent::Loading(false))
        .count(),
      1
    );
  }

  #[tokio::test]
  async fn test_fetch_failure_without_cache_surfaces() {
    let (repo, remote) = setup();
    remote.state().fail_fetch = true;

    let events = repo.reports().events().await;
    assert_eq!(
      events,
      vec![
        ReadEvent::Loading(true),
        ReadEvent::Failed(SyncError::Remote(RemoteError::Unavailable(
          "fake remote switched off".to_string()
        ))),
        ReadEvent::Loading(false),
      ]
    );
  }

  #[tokio::test]
  async fn test_invalidated_read_skips_cache_and_clears_flag() {
    let (repo, remote) = setup();
    seed_reports(&repo, vec![report("r1", 1)], "h1").await;
    remote
      .state()
      .checksums
      .insert("reports".to_string(), "h1".to_string());
    remote.state().reports = vec![report("r1", 1), report("r2", 2)];

    repo.invalidate_reports().await;
    assert_eq!(
      repo
        .cache()
        .metadata(&CacheKey::Reports)
        .await
        .map(|m| m.hash),
      Some(String::new())
    );

    let events = repo.reports().events().await;
    assert_eq!(events[0], ReadEvent::Loading(true));
    assert!(!events.iter().any(|e| matches!(e, ReadEvent::CacheHit(_))));
    assert!(!repo.inner.invalidation.is_set(&CacheKey::Reports));
    assert_eq!(remote.calls("fetch_reports"), 1);
    assert_eq!(remote.calls("fetch_checksums"), 0);
  }

  #[tokio::test]
  async fn test_invalidated_read_failure_surfaces_despite_cache() {
    let (repo, remote) = setup();
    seed_reports(&repo, vec![report("r1", 1)], "h1").await;
    repo.invalidate_reports().await;
    remote.state().fail_fetch = true;

    let result = repo.reports().last_data().await;
    assert!(matches!(result, Err(SyncError::Remote(_))));
  }

  #[tokio::test]
  async fn test_vote_refresh_emits_fresh_twice() {
    let (repo, remote) = setup();
    repo.sign_in("viewer").await;
    seed_reports(&repo, vec![report("r1", 1)], "h1").await;
    {
      let mut state = remote.state();
      state.checksums.insert("reports".to_string(), "h1".to_string());
      state.report_votes.insert("r1".to_string(), Vote::UP);
    }

    let fresh: Vec<Vec<Report>> = repo
      .reports()
      .events()
      .await
      .into_iter()
      .filter_map(|e| match e {
        ReadEvent::Fresh { items, .. } => Some(items),
        _ => None,
      })
      .collect();
    assert_eq!(fresh.len(), 2);
    assert_eq!(fresh[0][0].viewer_vote, Vote::NONE);
    assert_eq!(fresh[1][0].viewer_vote, Vote::UP);
    assert_eq!(
      repo
        .cache()
        .viewer_votes(VoteSubject::Report, "viewer")
        .await
        .get("r1"),
      Some(&Vote::UP)
    );
  }

  #[tokio::test]
  async fn test_sign_in_preloads_votes_into_cache_hit() {
    let (repo, remote) = setup();
    remote
      .state()
      .comment_votes
      .insert("c1".to_string(), Vote::DOWN);
    repo.sign_in("viewer").await;
    repo.cache().replace_comments("r1", vec![comment("c1", "r1", 1)]).await;

    let mut stream = repo.comments("r1");
    match stream.next().await {
      Some(ReadEvent::CacheHit(items)) => assert_eq!(items[0].viewer_vote, Vote::DOWN),
      other => panic!("expected cache hit, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_upvote_confirmed_by_server() {
    let (repo, remote) = setup();
    let mut target = report("r1", 1);
    target.score = 10;
    remote.state().reports = vec![target.clone()];
    repo.sign_in("viewer").await;
    repo.cache().upsert_report(target.clone()).await;
    let mut list = vec![target];

    let pending = repo
      .vote_report(&mut list, "r1", VoteDirection::Up)
      .await
      .unwrap();
    assert_eq!(list[0].score, 11);
    assert_eq!(list[0].viewer_vote, Vote::UP);
    assert_eq!(repo.cache().report("r1").await.unwrap().score, 11);

    pending.settle(&mut list).await.unwrap();
    assert_eq!(list[0].score, 11);
    assert_eq!(list[0].viewer_vote, Vote::UP);
    assert!(!repo.inner.invalidation.is_set(&CacheKey::Reports));
  }

  #[tokio::test]
  async fn test_upvote_rolled_back_on_failure() {
    let (repo, remote) = setup();
    let mut target = report("r1", 1);
    target.score = 10;
    repo.sign_in("viewer").await;
    repo.cache().upsert_report(target.clone()).await;
    remote.state().fail_mutations = true;
    let mut list = vec![target];

    let pending = repo
      .vote_report(&mut list, "r1", VoteDirection::Up)
      .await
      .unwrap();
    let result = pending.settle(&mut list).await;

    assert!(matches!(result, Err(SyncError::Remote(_))));
    assert_eq!(list[0].score, 10);
    assert_eq!(list[0].viewer_vote, Vote::NONE);
    assert_eq!(repo.cache().report("r1").await.unwrap().score, 10);
    assert_eq!(
      repo
        .cache()
        .viewer_votes(VoteSubject::Report, "viewer")
        .await
        .get("r1"),
      Some(&Vote::NONE)
    );
  }

  #[tokio::test]
  async fn test_delete_comment_rolls_back_to_index_and_count() {
    let (repo, remote) = setup();
    repo.sign_in("viewer").await;
    let mut parent = report("r1", 1);
    parent.comment_count = 3;
    repo.cache().upsert_report(parent).await;
    let mut list = vec![
      comment("c1", "r1", 3),
      comment("c2", "r1", 2),
      comment("c3", "r1", 1),
    ];
    repo.cache().replace_comments("r1", list.clone()).await;
    remote.state().fail_mutations = true;

    let pending = repo.delete_comment(&mut list, "c2").await.unwrap();
    assert_eq!(ids(&list), vec!["c1", "c3"]);
    assert!(repo.cache().comment("c2").await.is_none());
    assert_eq!(pending.comment_count().map(|c| c.after), Some(2));
    assert_eq!(repo.cache().report("r1").await.unwrap().comment_count, 2);

    assert!(pending.settle(&mut list).await.is_err());
    assert_eq!(ids(&list), vec!["c1", "c2", "c3"]);
    assert!(repo.cache().comment("c2").await.is_some());
    assert_eq!(repo.cache().report("r1").await.unwrap().comment_count, 3);
  }

  #[tokio::test]
  async fn test_confirmed_comment_submit_flags_collections() {
    let (repo, _remote) = setup();
    repo.sign_in("viewer").await;
    let mut list = vec![comment("c1", "r1", 1)];
    repo.cache().replace_comments("r1", list.clone()).await;
    repo
      .cache()
      .put_metadata(&CacheKey::comments("r1"), "h1".to_string(), 1)
      .await;

    let pending = repo.submit_comment(&mut list, "r1", "me too").await.unwrap();
    assert_eq!(list[0].content, "me too");
    assert!(list[0].id.starts_with("local-"));
    // Parent is not cached, so there is no count to move
    assert!(pending.comment_count().is_none());

    let settled = pending.settle(&mut list).await.unwrap();
    assert_eq!(list[0].id, settled.id);
    assert!(repo.cache().comment(&settled.id).await.is_some());
    assert!(repo.inner.invalidation.is_set(&CacheKey::comments("r1")));
    assert!(repo.inner.invalidation.is_set(&CacheKey::Reports));
    assert_eq!(
      repo
        .cache()
        .metadata(&CacheKey::comments("r1"))
        .await
        .map(|m| m.hash),
      Some(String::new())
    );
  }

  #[tokio::test]
  async fn test_confirmed_submit_still_refetches_after_failed_forced_read() {
    let (repo, remote) = setup();
    repo.sign_in("viewer").await;
    let mut list = vec![comment("c1", "r1", 1)];
    repo.cache().replace_comments("r1", list.clone()).await;
    repo
      .cache()
      .put_metadata(&CacheKey::comments("r1"), "h1".to_string(), 1)
      .await;

    let pending = repo.submit_comment(&mut list, "r1", "me too").await.unwrap();
    let settled = pending.settle(&mut list).await.unwrap();

    // The forced read uses up the flag and fails
    remote.state().fail_fetch = true;
    assert!(repo.comments("r1").last_data().await.is_err());

    let mut server_comment = comment(&settled.id, "r1", 2);
    server_comment.content = "me too".to_string();
    {
      let mut state = remote.state();
      state.fail_fetch = false;
      state.fail_checksums = true;
      state
        .comments
        .insert("r1".to_string(), vec![comment("c1", "r1", 1), server_comment]);
    }

    let events = repo.comments("r1").events().await;
    assert!(events.iter().any(|e| matches!(
      e,
      ReadEvent::Fresh {
        source: CacheSource::Network,
        ..
      }
    )));
    assert_eq!(remote.calls("fetch_comments"), 2);
  }

  #[tokio::test]
  async fn test_dropped_submit_stays_provisional_until_refetch() {
    let (repo, remote) = setup();
    repo.sign_in("viewer").await;
    let mut list = vec![comment("c1", "r1", 1)];

    let pending = repo.submit_comment(&mut list, "r1", "draft").await.unwrap();
    drop(pending);

    let provisional = list[0].id.clone();
    assert_eq!(list.len(), 2);
    assert!(repo.cache().comment(&provisional).await.is_some());
    assert_eq!(remote.calls("submit_comment"), 0);

    remote
      .state()
      .comments
      .insert("r1".to_string(), vec![comment("c1", "r1", 1)]);
    let fresh = repo.comments("r1").last_data().await.unwrap();
    assert_eq!(ids(&fresh), vec!["c1"]);
    assert!(repo.cache().comment(&provisional).await.is_none());
  }

  #[tokio::test]
  async fn test_blank_hash_refetches_within_ttl_without_checksum() {
    let (repo, remote) = setup();
    seed_reports(&repo, vec![report("r1", 1)], "h1").await;
    repo.invalidate_reports().await;

    remote.state().fail_fetch = true;
    assert!(repo.reports().last_data().await.is_err());
    assert_eq!(repo.cache().local_hash(&CacheKey::Reports).await, None);

    {
      let mut state = remote.state();
      state.fail_fetch = false;
      state.fail_checksums = true;
      state.reports = vec![report("r2", 2), report("r1", 1)];
    }

    let events = repo.reports().events().await;
    assert!(matches!(events[0], ReadEvent::CacheHit(_)));
    match events.iter().find(|e| matches!(e, ReadEvent::Fresh { .. })) {
      Some(ReadEvent::Fresh { items, source }) => {
        assert_eq!(ids(items), vec!["r2", "r1"]);
        assert_eq!(*source, CacheSource::Network);
      }
      other => panic!("expected fresh data, got {:?}", other),
    }
    assert_eq!(remote.calls("fetch_reports"), 2);
    assert!(repo.cache().local_hash(&CacheKey::Reports).await.is_some());
  }

  #[tokio::test]
  async fn test_submit_report_with_failed_photo_is_two_signals() {
    let (repo, remote) = setup();
    repo.sign_in("viewer").await;
    remote.state().fail_photo = true;
    let mut list = vec![report("r1", 1)];

    let pending = repo
      .submit_report(&mut list, draft("Fallen tree"), Some("aGVsbG8=".to_string()))
      .await
      .unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].description, "Fallen tree");
    assert_eq!(list[0].author_id, "viewer");

    let settled = pending.settle(&mut list).await.unwrap();
    assert_eq!(list[0].id, settled.id);
    assert!(matches!(settled.photo, Some(Err(SyncError::Remote(_)))));
    assert_eq!(remote.calls("upload_report_photo"), 1);
    assert!(repo.cache().report(&settled.id).await.is_some());
  }

  #[tokio::test]
  async fn test_failed_submit_removes_provisional_report() {
    let (repo, remote) = setup();
    repo.sign_in("viewer").await;
    remote.state().fail_mutations = true;
    let mut list = vec![report("r1", 1)];

    let pending = repo
      .submit_report(&mut list, draft("Flooding"), None)
      .await
      .unwrap();
    let provisional = pending.id().to_string();
    assert!(pending.settle(&mut list).await.is_err());
    assert_eq!(ids(&list), vec!["r1"]);
    assert!(repo.cache().report(&provisional).await.is_none());
  }

  #[tokio::test]
  async fn test_edit_and_status_change_roll_back() {
    let (repo, remote) = setup();
    repo.sign_in("viewer").await;
    let unedited = report("r1", 1);
    repo.cache().upsert_report(unedited.clone()).await;
    remote.state().fail_mutations = true;
    let mut list = vec![unedited.clone()];

    let pending = repo
      .edit_report(&mut list, "r1", draft("Edited"))
      .await
      .unwrap();
    assert_eq!(list[0].description, "Edited");
    assert_eq!(
      repo.cache().report("r1").await.unwrap().description,
      "Edited"
    );
    assert!(pending.settle(&mut list).await.is_err());
    assert_eq!(list[0], unedited);
    assert_eq!(
      repo.cache().report("r1").await.unwrap().description,
      unedited.description
    );

    let pending = repo
      .update_report_status(&mut list, "r1", ReportStatus::Resolved)
      .await
      .unwrap();
    assert_eq!(list[0].status, ReportStatus::Resolved);
    assert!(pending.settle(&mut list).await.is_err());
    assert_eq!(list[0].status, ReportStatus::Submitted);
  }

  #[tokio::test]
  async fn test_edit_comment_confirmed() {
    let (repo, _remote) = setup();
    repo.sign_in("viewer").await;
    let mut list = vec![comment("c1", "r1", 1)];
    repo.cache().upsert_comment(list[0].clone()).await;

    let pending = repo.edit_comment(&mut list, "c1", "fixed typo").await.unwrap();
    pending.settle(&mut list).await.unwrap();
    assert_eq!(list[0].content, "fixed typo");
    assert_eq!(repo.cache().comment("c1").await.unwrap().content, "fixed typo");
    assert!(repo.inner.invalidation.is_set(&CacheKey::comments("r1")));
  }

  #[tokio::test]
  async fn test_delete_report_confirmed() {
    let (repo, _remote) = setup();
    repo.sign_in("viewer").await;
    let mut list = vec![report("r2", 2), report("r1", 1)];
    repo.cache().replace_reports(list.clone()).await;

    let pending = repo.delete_report(&mut list, "r2").await.unwrap();
    pending.settle(&mut list).await.unwrap();
    assert_eq!(ids(&list), vec!["r1"]);
    assert!(repo.cache().report("r2").await.is_none());
    assert!(repo.inner.invalidation.is_set(&CacheKey::Reports));
  }

  #[tokio::test]
  async fn test_mutations_require_viewer() {
    let (repo, _remote) = setup();
    let mut list = vec![report("r1", 1)];
    let result = repo.vote_report(&mut list, "r1", VoteDirection::Up).await;
    assert!(matches!(result, Err(SyncError::NotSignedIn)));

    repo.sign_in("viewer").await;
    let result = repo.vote_report(&mut list, "nope", VoteDirection::Up).await;
    assert!(matches!(result, Err(SyncError::NotFound { .. })));
  }

  #[tokio::test(start_paused = true)]
  async fn test_navigation_checksum_fetch_is_throttled() {
    let (repo, remote) = setup();

    repo.validate_on_navigation().await;
    tokio::time::advance(Duration::from_millis(500)).await;
    assert!(repo.validate_on_navigation().await.is_empty());
    assert_eq!(remote.calls("fetch_checksums"), 1);

    tokio::time::advance(Duration::from_millis(1600)).await;
    repo.validate_on_navigation().await;
    assert_eq!(remote.calls("fetch_checksums"), 2);
  }

  #[tokio::test]
  async fn test_navigation_flags_changed_collections() {
    let (repo, remote) = setup();
    seed_reports(&repo, vec![report("r1", 1)], "old").await;
    repo
      .cache()
      .put_metadata(&CacheKey::comments("r1"), "same".to_string(), 0)
      .await;
    {
      let mut state = remote.state();
      state.checksums.insert("reports".to_string(), "new".to_string());
      state.checksums.insert("comments_r1".to_string(), "same".to_string());
      state.checksums.insert("comments_r9".to_string(), "x".to_string());
      state.checksums.insert("stats".to_string(), "y".to_string());
      state.reports = vec![report("r2", 2), report("r1", 1)];
    }

    let invalidated = repo.validate_on_navigation().await;
    assert_eq!(invalidated, vec![CacheKey::Reports]);

    let data = repo.reports().last_data().await.unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(
      repo.cache().local_hash(&CacheKey::Reports).await,
      Some("new".to_string())
    );
    assert_eq!(remote.calls("fetch_checksums"), 1);
  }

  #[tokio::test]
  async fn test_navigation_checksum_failure_invalidates_nothing() {
    let (repo, remote) = setup();
    seed_reports(&repo, vec![report("r1", 1)], "old").await;
    remote.state().fail_checksums = true;

    assert!(repo.validate_on_navigation().await.is_empty());
    assert!(!repo.inner.invalidation.is_set(&CacheKey::Reports));
    assert_eq!(
      repo.cache().local_hash(&CacheKey::Reports).await,
      Some("old".to_string())
    );
  }

  #[tokio::test]
  async fn test_user_reports_filters_by_author() {
    let (repo, remote) = setup();
    assert!(repo.user_reports().last_data().await.is_err());

    repo.sign_in("viewer").await;
    let mut mine = report("mine", 2);
    mine.author_id = "viewer".to_string();
    {
      let mut state = remote.state();
      state.fail_checksums = true;
      state.reports = vec![report("theirs", 3), mine];
    }

    let data = repo.user_reports().last_data().await.unwrap();
    assert_eq!(ids(&data), vec!["mine"]);
  }

  #[tokio::test]
  async fn test_profile_is_refetched_only_after_ttl() {
    let (repo, remote) = setup();
    remote.state().profiles.insert(
      "u1".to_string(),
      UserProfile {
        user_id: "u1".to_string(),
        name: Some("Ana".to_string()),
        phone: None,
        email: None,
        avatar_url: None,
        cached_at: 0,
      },
    );

    let first = repo.user_profile("u1").events().await;
    assert!(first.iter().any(|e| matches!(
      e,
      ReadEvent::Fresh {
        source: CacheSource::Network,
        ..
      }
    )));

    let second = repo.user_profile("u1").last_data().await.unwrap();
    assert_eq!(second[0].name.as_deref(), Some("Ana"));
    assert_eq!(remote.calls("fetch_user_profile"), 1);
  }

  #[tokio::test]
  async fn test_profile_write_patches_cache_and_flags_reports() {
    let (repo, _remote) = setup();
    repo.sign_in("viewer").await;
    seed_reports(&repo, vec![report("r1", 1)], "h1").await;
    repo
      .cache()
      .upsert_profile(UserProfile {
        user_id: "viewer".to_string(),
        name: Some("Old".to_string()),
        phone: None,
        email: None,
        avatar_url: None,
        cached_at: 0,
      })
      .await;

    repo.update_display_name("New").await.unwrap();
    let url = repo.update_avatar("aGk=").await.unwrap();

    let profile = repo.cache().profile("viewer").await.unwrap();
    assert_eq!(profile.name.as_deref(), Some("New"));
    assert_eq!(profile.avatar_url, Some(url));
    assert!(repo.inner.invalidation.is_set(&CacheKey::Reports));
    assert_eq!(repo.cache().local_hash(&CacheKey::Reports).await, None);
  }

  #[tokio::test]
  async fn test_sign_out_wipes_everything() {
    let (repo, _remote) = setup();
    repo.sign_in("viewer").await;
    seed_reports(&repo, vec![report("r1", 1)], "h1").await;
    repo.invalidate_comments("r1").await;

    repo.sign_out().await;
    assert_eq!(repo.viewer(), None);
    assert_eq!(repo.cache().report_count().await, 0);
    assert!(repo.cache().all_metadata().await.is_empty());
    assert!(!repo.inner.invalidation.is_set(&CacheKey::comments("r1")));
  }
}
