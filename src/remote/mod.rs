//! The remote service, seen from the sync layer.
//!
//! `RemoteClient` is the only way the repository reaches the network. The
//! HTTP implementation lives in [`http`]; tests use an in-memory fake.

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpRemote;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::cache::CacheKey;
use crate::model::{Comment, Report, ReportDraft, ReportStatus, UserProfile, Vote, VoteSubject};

/// Checksums keyed by cache key in wire form (`reports`, `comments_<id>`).
pub type Checksums = HashMap<String, String>;

/// Votes keyed by subject id.
pub type VoteMap = HashMap<String, Vote>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
  /// The request never got an answer (network, timeout, 5xx)
  #[error("remote service unavailable: {0}")]
  Unavailable(String),
  /// The service answered and refused
  #[error("remote service rejected the request: {0}")]
  Rejected(String),
  #[error("invalid response from remote service: {0}")]
  InvalidResponse(String),
}

/// Server-confirmed state after a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct VoteResult {
  pub score: i64,
  #[serde(rename = "userVote")]
  pub viewer_vote: Vote,
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
  async fn fetch_reports(&self) -> Result<Vec<Report>, RemoteError>;

  async fn fetch_comments(&self, report_id: &str) -> Result<Vec<Comment>, RemoteError>;

  /// Every collection's checksum in one call.
  async fn fetch_checksums(&self) -> Result<Checksums, RemoteError>;

  /// Checksum of one collection; `None` when the server has none for it.
  async fn fetch_checksum(&self, key: &CacheKey) -> Result<Option<String>, RemoteError> {
    Ok(self.fetch_checksums().await?.remove(&key.to_string()))
  }

  /// The viewer's votes on the given subjects.
  async fn fetch_viewer_votes(
    &self,
    subject: VoteSubject,
    ids: &[String],
    viewer_id: &str,
  ) -> Result<VoteMap, RemoteError>;

  /// Every vote the viewer has cast on one subject type.
  async fn fetch_all_viewer_votes(
    &self,
    subject: VoteSubject,
    viewer_id: &str,
  ) -> Result<VoteMap, RemoteError>;

  async fn fetch_user_profile(&self, user_id: &str) -> Result<UserProfile, RemoteError>;

  /// Set the viewer's vote on a subject. `vote` is the resulting vote, so
  /// `Vote::NONE` removes it.
  async fn vote(
    &self,
    subject: VoteSubject,
    subject_id: &str,
    viewer_id: &str,
    vote: Vote,
  ) -> Result<VoteResult, RemoteError>;

  /// Create a report and return its server id.
  async fn submit_report(
    &self,
    draft: &ReportDraft,
    viewer_id: &str,
  ) -> Result<String, RemoteError>;

  /// Attach a photo (base64 payload) to an existing report.
  async fn upload_report_photo(
    &self,
    report_id: &str,
    image_base64: &str,
  ) -> Result<(), RemoteError>;

  async fn edit_report(
    &self,
    report_id: &str,
    viewer_id: &str,
    draft: &ReportDraft,
    status: ReportStatus,
  ) -> Result<(), RemoteError>;

  async fn update_report_status(
    &self,
    report_id: &str,
    viewer_id: &str,
    status: ReportStatus,
  ) -> Result<(), RemoteError>;

  async fn delete_report(&self, report_id: &str, viewer_id: &str) -> Result<(), RemoteError>;

  /// Create a comment and return its server id.
  async fn submit_comment(
    &self,
    content: &str,
    report_id: &str,
    viewer_id: &str,
  ) -> Result<String, RemoteError>;

  async fn edit_comment(
    &self,
    comment_id: &str,
    viewer_id: &str,
    content: &str,
  ) -> Result<(), RemoteError>;

  async fn delete_comment(&self, comment_id: &str, viewer_id: &str) -> Result<(), RemoteError>;

  async fn update_display_name(&self, user_id: &str, name: &str) -> Result<(), RemoteError>;

  async fn update_phone(&self, user_id: &str, phone: &str) -> Result<(), RemoteError>;

  /// Upload a new avatar and return its public URL.
  async fn upload_avatar(&self, user_id: &str, image_base64: &str) -> Result<String, RemoteError>;
}
