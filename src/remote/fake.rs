//! In-memory remote service for repository tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{Checksums, RemoteClient, RemoteError, VoteMap, VoteResult};
use crate::model::{Comment, Report, ReportDraft, ReportStatus, UserProfile, Vote, VoteSubject};

#[derive(Default)]
pub(crate) struct FakeState {
  pub reports: Vec<Report>,
  pub comments: HashMap<String, Vec<Comment>>,
  pub checksums: Checksums,
  pub profiles: HashMap<String, UserProfile>,
  pub report_votes: VoteMap,
  pub comment_votes: VoteMap,
  /// Content fetches (reports, comments, profiles, votes) fail
  pub fail_fetch: bool,
  /// Checksum calls fail
  pub fail_checksums: bool,
  /// Every write call fails
  pub fail_mutations: bool,
  /// Only photo uploads fail
  pub fail_photo: bool,
  pub calls: HashMap<&'static str, usize>,
  next_id: usize,
}

#[derive(Default)]
pub(crate) struct FakeRemote {
  state: Mutex<FakeState>,
}

fn unavailable() -> RemoteError {
  RemoteError::Unavailable("fake remote switched off".to_string())
}

impl FakeRemote {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn state(&self) -> MutexGuard<'_, FakeState> {
    self.state.lock().unwrap()
  }

  pub fn calls(&self, name: &str) -> usize {
    self.state().calls.get(name).copied().unwrap_or(0)
  }

  fn begin(&self, name: &'static str) -> MutexGuard<'_, FakeState> {
    let mut state = self.state();
    *state.calls.entry(name).or_insert(0) += 1;
    state
  }

  fn fetch(&self, name: &'static str) -> Result<MutexGuard<'_, FakeState>, RemoteError> {
    let state = self.begin(name);
    if state.fail_fetch {
      return Err(unavailable());
    }
    Ok(state)
  }

  fn write(&self, name: &'static str) -> Result<MutexGuard<'_, FakeState>, RemoteError> {
    let state = self.begin(name);
    if state.fail_mutations {
      return Err(unavailable());
    }
    Ok(state)
  }
}

impl FakeState {
  fn next_id(&mut self, prefix: &str) -> String {
    self.next_id += 1;
    format!("{}-{}", prefix, self.next_id)
  }
}

#[async_trait]
impl RemoteClient for FakeRemote {
  async fn fetch_reports(&self) -> Result<Vec<Report>, RemoteError> {
    Ok(self.fetch("fetch_reports")?.reports.clone())
  }

  async fn fetch_comments(&self, report_id: &str) -> Result<Vec<Comment>, RemoteError> {
    Ok(
      self
        .fetch("fetch_comments")?
        .comments
        .get(report_id)
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn fetch_checksums(&self) -> Result<Checksums, RemoteError> {
    let state = self.begin("fetch_checksums");
    if state.fail_checksums {
      return Err(unavailable());
    }
    Ok(state.checksums.clone())
  }

  async fn fetch_viewer_votes(
    &self,
    subject: VoteSubject,
    ids: &[String],
    _viewer_id: &str,
  ) -> Result<VoteMap, RemoteError> {
    let state = self.fetch("fetch_viewer_votes")?;
    let votes = match subject {
      VoteSubject::Report => &state.report_votes,
      VoteSubject::Comment => &state.comment_votes,
    };
    Ok(
      ids
        .iter()
        .filter_map(|id| votes.get(id).map(|v| (id.clone(), *v)))
        .collect(),
    )
  }

  async fn fetch_all_viewer_votes(
    &self,
    subject: VoteSubject,
    _viewer_id: &str,
  ) -> Result<VoteMap, RemoteError> {
    let state = self.fetch("fetch_all_viewer_votes")?;
    Ok(match subject {
      VoteSubject::Report => state.report_votes.clone(),
      VoteSubject::Comment => state.comment_votes.clone(),
    })
  }

  async fn fetch_user_profile(&self, user_id: &str) -> Result<UserProfile, RemoteError> {
    self
      .fetch("fetch_user_profile")?
      .profiles
      .get(user_id)
      .cloned()
      .ok_or_else(|| RemoteError::Rejected(format!("no user {}", user_id)))
  }

  async fn vote(
    &self,
    subject: VoteSubject,
    subject_id: &str,
    _viewer_id: &str,
    vote: Vote,
  ) -> Result<VoteResult, RemoteError> {
    let mut state = self.write("vote")?;
    let previous = match subject {
      VoteSubject::Report => state.report_votes.insert(subject_id.to_string(), vote),
      VoteSubject::Comment => state.comment_votes.insert(subject_id.to_string(), vote),
    }
    .unwrap_or_default();

    let delta = vote.value() - previous.value();
    let score = match subject {
      VoteSubject::Report => state
        .reports
        .iter_mut()
        .find(|r| r.id == subject_id)
        .map(|r| {
          r.score += delta;
          r.score
        }),
      VoteSubject::Comment => state
        .comments
        .values_mut()
        .flatten()
        .find(|c| c.id == subject_id)
        .map(|c| {
          c.score += delta;
          c.score
        }),
    }
    .ok_or_else(|| RemoteError::Rejected(format!("no subject {}", subject_id)))?;

    Ok(VoteResult {
      score,
      viewer_vote: vote,
    })
  }

  async fn submit_report(
    &self,
    _draft: &ReportDraft,
    _viewer_id: &str,
  ) -> Result<String, RemoteError> {
    Ok(self.write("submit_report")?.next_id("report"))
  }

  async fn upload_report_photo(&self, _report_id: &str, _image: &str) -> Result<(), RemoteError> {
    let state = self.write("upload_report_photo")?;
    if state.fail_photo {
      return Err(unavailable());
    }
    Ok(())
  }

  async fn edit_report(
    &self,
    _report_id: &str,
    _viewer_id: &str,
    _draft: &ReportDraft,
    _status: ReportStatus,
  ) -> Result<(), RemoteError> {
    self.write("edit_report").map(|_| ())
  }

  async fn update_report_status(
    &self,
    _report_id: &str,
    _viewer_id: &str,
    _status: ReportStatus,
  ) -> Result<(), RemoteError> {
    self.write("update_report_status").map(|_| ())
  }

  async fn delete_report(&self, _report_id: &str, _viewer_id: &str) -> Result<(), RemoteError> {
    self.write("delete_report").map(|_| ())
  }

  async fn submit_comment(
    &self,
    _content: &str,
    _report_id: &str,
    _viewer_id: &str,
  ) -> Result<String, RemoteError> {
    Ok(self.write("submit_comment")?.next_id("comment"))
  }

  async fn edit_comment(
    &self,
    _comment_id: &str,
    _viewer_id: &str,
    _content: &str,
  ) -> Result<(), RemoteError> {
    self.write("edit_comment").map(|_| ())
  }

  async fn delete_comment(&self, _comment_id: &str, _viewer_id: &str) -> Result<(), RemoteError> {
    self.write("delete_comment").map(|_| ())
  }

  async fn update_display_name(&self, _user_id: &str, _name: &str) -> Result<(), RemoteError> {
    self.write("update_display_name").map(|_| ())
  }

  async fn update_phone(&self, _user_id: &str, _phone: &str) -> Result<(), RemoteError> {
    self.write("update_phone").map(|_| ())
  }

  async fn upload_avatar(&self, user_id: &str, _image: &str) -> Result<String, RemoteError> {
    self.write("upload_avatar").map(|_| ())?;
    Ok(format!("https://cdn.example.net/avatars/{}.jpg", user_id))
  }
}
