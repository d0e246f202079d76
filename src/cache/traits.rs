//! Core traits and types for the caching system.

use std::fmt;

use crate::model::{Comment, Report, UserProfile, Vote, VoteSubject};

/// Trait for entities that can be cached.
///
/// The fingerprint is the canonical, field-derived representation used for
/// content hashing. It must cover every server-owned field and nothing that is
/// derived locally (viewer vote, cache insertion time), so two fetches of the
/// same server state always fingerprint the same.
pub trait Cacheable: Clone + Send + Sync + 'static {
  /// Unique identifier for this entity (report id, comment id, user id)
  fn cache_key(&self) -> &str;

  /// Entity type name, used in logs and errors
  fn entity_type() -> &'static str;

  /// Canonical field-wise representation of the entity
  fn fingerprint(&self) -> String;
}

/// Entities that carry a server score and a viewer vote overlay.
pub trait Votable: Cacheable {
  fn vote_subject() -> VoteSubject;
  fn score(&self) -> i64;
  fn set_score(&mut self, score: i64);
  fn viewer_vote(&self) -> Vote;
  fn set_viewer_vote(&mut self, vote: Vote);
}

/// Key of one cached collection, as used by the metadata table and by the
/// server's checksum map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
  /// Every report
  Reports,
  /// Comments of one report
  Comments(String),
  /// One user's profile
  Profile(String),
}

const COMMENTS_PREFIX: &str = "comments_";
const PROFILE_PREFIX: &str = "user_profile_";

impl CacheKey {
  pub fn comments(report_id: &str) -> Self {
    CacheKey::Comments(report_id.to_string())
  }

  pub fn profile(user_id: &str) -> Self {
    CacheKey::Profile(user_id.to_string())
  }

  /// Parse a key in its wire form (`reports`, `comments_<id>`, `user_profile_<id>`).
  pub fn parse(s: &str) -> Option<Self> {
    if s == "reports" {
      return Some(CacheKey::Reports);
    }
    if let Some(id) = s.strip_prefix(COMMENTS_PREFIX).filter(|id| !id.is_empty()) {
      return Some(CacheKey::Comments(id.to_string()));
    }
    s.strip_prefix(PROFILE_PREFIX)
      .filter(|id| !id.is_empty())
      .map(|id| CacheKey::Profile(id.to_string()))
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheKey::Reports => f.write_str("reports"),
      CacheKey::Comments(id) => write!(f, "{}{}", COMMENTS_PREFIX, id),
      CacheKey::Profile(id) => write!(f, "{}{}", PROFILE_PREFIX, id),
    }
  }
}

/// Indicates where a fresh result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the remote service during this read
  Network,
  /// Cached rows whose hash matched the server checksum
  CacheFresh,
  /// Cached rows served because the checksum was unavailable and the TTL had not expired
  CacheWithinTtl,
}

/// ASCII unit separator between fingerprint fields.
const SEP: char = '\u{1f}';

fn join_fields(fields: &[&str]) -> String {
  let mut out = String::new();
  for (i, field) in fields.iter().enumerate() {
    if i > 0 {
      out.push(SEP);
    }
    out.push_str(field);
  }
  out
}

impl Cacheable for Report {
  fn cache_key(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "report"
  }

  fn fingerprint(&self) -> String {
    // coordinates are fingerprinted by bit pattern
    join_fields(&[
      &self.id,
      &self.description,
      &self.category,
      &self.authority,
      &self.location,
      &format!("{:016x}", self.latitude.to_bits()),
      &format!("{:016x}", self.longitude.to_bits()),
      self.status.as_str(),
      self.photo_url.as_deref().unwrap_or(""),
      &self.author_id,
      &self.author_name,
      self.author_avatar_url.as_deref().unwrap_or(""),
      &self.votes.to_string(),
      &self.score.to_string(),
      &self.created_at.to_string(),
      &self.comment_count.to_string(),
    ])
  }
}

impl Votable for Report {
  fn vote_subject() -> VoteSubject {
    VoteSubject::Report
  }

  fn score(&self) -> i64 {
    self.score
  }

  fn set_score(&mut self, score: i64) {
    self.score = score;
  }

  fn viewer_vote(&self) -> Vote {
    self.viewer_vote
  }

  fn set_viewer_vote(&mut self, vote: Vote) {
    self.viewer_vote = vote;
  }
}

impl Cacheable for Comment {
  fn cache_key(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "comment"
  }

  fn fingerprint(&self) -> String {
    join_fields(&[
      &self.id,
      &self.report_id,
      &self.content,
      &self.author_id,
      &self.author_name,
      self.author_avatar_url.as_deref().unwrap_or(""),
      &self.score.to_string(),
      &self.created_at.to_string(),
    ])
  }
}

impl Votable for Comment {
  fn vote_subject() -> VoteSubject {
    VoteSubject::Comment
  }

  fn score(&self) -> i64 {
    self.score
  }

  fn set_score(&mut self, score: i64) {
    self.score = score;
  }

  fn viewer_vote(&self) -> Vote {
    self.viewer_vote
  }

  fn set_viewer_vote(&mut self, vote: Vote) {
    self.viewer_vote = vote;
  }
}

impl Cacheable for UserProfile {
  fn cache_key(&self) -> &str {
    &self.user_id
  }

  fn entity_type() -> &'static str {
    "user_profile"
  }

  fn fingerprint(&self) -> String {
    join_fields(&[
      &self.user_id,
      self.name.as_deref().unwrap_or(""),
      self.phone.as_deref().unwrap_or(""),
      self.email.as_deref().unwrap_or(""),
      self.avatar_url.as_deref().unwrap_or(""),
    ])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_round_trip() {
    for key in [
      CacheKey::Reports,
      CacheKey::comments("abc"),
      CacheKey::profile("u_1"),
    ] {
      assert_eq!(CacheKey::parse(&key.to_string()), Some(key));
    }
  }

  #[test]
  fn test_cache_key_rejects_unknown() {
    assert_eq!(CacheKey::parse("all_reports"), None);
    assert_eq!(CacheKey::parse("comments_"), None);
  }

  #[test]
  fn test_fingerprint_ignores_local_fields() {
    let mut comment = Comment {
      id: "c1".into(),
      report_id: "r1".into(),
      content: "hi".into(),
      author_id: "u1".into(),
      author_name: "Ana".into(),
      author_avatar_url: None,
      score: 1,
      created_at: 10,
      viewer_vote: Vote::NONE,
      cached_at: 0,
    };
    let before = comment.fingerprint();
    comment.viewer_vote = Vote::UP;
    comment.cached_at = 999;
    assert_eq!(comment.fingerprint(), before);

    comment.content = "hi!".into();
    assert_ne!(comment.fingerprint(), before);
  }
}
