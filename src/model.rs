//! Entities persisted by the local store and exchanged with the remote service.
//!
//! Wire names follow the callable-function payloads (`documentId`, `hazardType`,
//! `localGov`, ...). Fields the server never sends (`viewer_vote`, `cached_at`)
//! are skipped on the wire and filled in locally.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::SyncError;

/// The viewer's vote on a report or comment: always one of -1, 0, +1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Vote(i8);

impl Vote {
  pub const DOWN: Vote = Vote(-1);
  pub const NONE: Vote = Vote(0);
  pub const UP: Vote = Vote(1);

  pub fn value(self) -> i64 {
    i64::from(self.0)
  }

  pub fn is_none(self) -> bool {
    self.0 == 0
  }
}

impl TryFrom<i64> for Vote {
  type Error = SyncError;

  fn try_from(value: i64) -> Result<Self, Self::Error> {
    match value {
      -1 => Ok(Vote::DOWN),
      0 => Ok(Vote::NONE),
      1 => Ok(Vote::UP),
      other => Err(SyncError::InvalidVote(other)),
    }
  }
}

impl From<Vote> for i64 {
  fn from(vote: Vote) -> Self {
    vote.value()
  }
}

impl From<VoteDirection> for Vote {
  fn from(direction: VoteDirection) -> Self {
    match direction {
      VoteDirection::Up => Vote::UP,
      VoteDirection::Down => Vote::DOWN,
    }
  }
}

/// A vote button press. Pressing the direction already held un-votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDirection {
  Up,
  Down,
}

impl VoteDirection {
  pub fn value(self) -> i64 {
    Vote::from(self).value()
  }
}

/// Which vote table a vote belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteSubject {
  Report,
  Comment,
}

impl VoteSubject {
  pub fn table(self) -> &'static str {
    match self {
      VoteSubject::Report => "report_votes",
      VoteSubject::Comment => "comment_votes",
    }
  }

  pub(crate) fn subject_column(self) -> &'static str {
    match self {
      VoteSubject::Report => "report_id",
      VoteSubject::Comment => "comment_id",
    }
  }
}

/// Lifecycle of a hazard report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReportStatus {
  #[default]
  Submitted,
  Confirmed,
  InProgress,
  Resolved,
}

impl ReportStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      ReportStatus::Submitted => "Submitted",
      ReportStatus::Confirmed => "Confirmed",
      ReportStatus::InProgress => "In progress",
      ReportStatus::Resolved => "Resolved",
    }
  }

  /// Parse the server's status string. Unknown values read as `Submitted`.
  pub fn parse_lossy(s: &str) -> Self {
    match s.trim().to_lowercase().as_str() {
      "confirmed" => ReportStatus::Confirmed,
      "in progress" | "in_progress" | "inprogress" => ReportStatus::InProgress,
      "resolved" => ReportStatus::Resolved,
      _ => ReportStatus::Submitted,
    }
  }
}

impl From<String> for ReportStatus {
  fn from(s: String) -> Self {
    ReportStatus::parse_lossy(&s)
  }
}

impl From<ReportStatus> for String {
  fn from(status: ReportStatus) -> Self {
    status.as_str().to_string()
  }
}

impl fmt::Display for ReportStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A hazard report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
  #[serde(rename = "documentId")]
  pub id: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub description: String,
  #[serde(rename = "hazardType", default, deserialize_with = "null_as_default")]
  pub category: String,
  #[serde(rename = "localGov", default, deserialize_with = "null_as_default")]
  pub authority: String,
  #[serde(rename = "locationDetails", default, deserialize_with = "null_as_default")]
  pub location: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub latitude: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub longitude: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub status: ReportStatus,
  #[serde(default)]
  pub photo_url: Option<String>,
  #[serde(rename = "userId", default, deserialize_with = "null_as_default")]
  pub author_id: String,
  #[serde(rename = "userName", default, deserialize_with = "null_as_default")]
  pub author_name: String,
  #[serde(rename = "profilePictureUrl", default)]
  pub author_avatar_url: Option<String>,
  /// Raw vote count as reported by the server
  #[serde(default, deserialize_with = "null_as_default")]
  pub votes: i64,
  /// Server-authoritative aggregate score
  #[serde(default, deserialize_with = "null_as_default")]
  pub score: i64,
  /// Creation time (unix millis)
  #[serde(default, deserialize_with = "null_as_default")]
  pub created_at: i64,
  #[serde(rename = "comments", default, deserialize_with = "null_as_default")]
  pub comment_count: i64,
  #[serde(skip)]
  pub viewer_vote: Vote,
  #[serde(skip)]
  pub cached_at: i64,
}

/// Fields a user supplies when creating or editing a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDraft {
  pub description: String,
  #[serde(rename = "hazardType")]
  pub category: String,
  #[serde(rename = "localGov")]
  pub authority: String,
  #[serde(rename = "locationDetails")]
  pub location: String,
  pub latitude: f64,
  pub longitude: f64,
}

impl ReportDraft {
  pub(crate) fn apply_to(&self, report: &mut Report) {
    report.description = self.description.clone();
    report.category = self.category.clone();
    report.authority = self.authority.clone();
    report.location = self.location.clone();
    report.latitude = self.latitude;
    report.longitude = self.longitude;
  }
}

/// A comment on a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
  #[serde(rename = "commentId")]
  pub id: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub report_id: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub content: String,
  #[serde(rename = "userId", default, deserialize_with = "null_as_default")]
  pub author_id: String,
  #[serde(rename = "userName", default, deserialize_with = "null_as_default")]
  pub author_name: String,
  #[serde(rename = "profilePictureUrl", default)]
  pub author_avatar_url: Option<String>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub score: i64,
  /// Creation time (unix millis)
  #[serde(rename = "datetime", default, deserialize_with = "null_as_default")]
  pub created_at: i64,
  #[serde(skip)]
  pub viewer_vote: Vote,
  #[serde(skip)]
  pub cached_at: i64,
}

/// Snapshot of a user's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
  pub user_id: String,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(rename = "profilePictureUrl", default)]
  pub avatar_url: Option<String>,
  #[serde(skip)]
  pub cached_at: i64,
}

/// One row of a vote table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRecord {
  pub subject_id: String,
  pub voter_id: String,
  pub vote: Vote,
  pub cached_at: i64,
}

/// Bookkeeping for one cached collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetadata {
  pub cache_key: String,
  /// Content hash; empty after an explicit invalidation
  pub hash: String,
  /// Unix millis of the last write
  pub last_updated: i64,
  pub item_count: i64,
}

/// Current time in unix millis.
pub fn now_millis() -> i64 {
  chrono::Utc::now().timestamp_millis()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
