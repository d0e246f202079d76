//! Callable-function client for the CityWatch backend.
//!
//! Every function is `POST {base_url}/{name}` with a `{"data": ...}` body and
//! answers `{"result": ...}` or `{"error": {"message": ...}}`.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{Checksums, RemoteClient, RemoteError, VoteMap, VoteResult};
use crate::config::{Config, RemoteConfig};
use crate::model::{Comment, Report, ReportDraft, ReportStatus, UserProfile, Vote, VoteSubject};

#[derive(Debug, Deserialize)]
struct CallableResponse {
  #[serde(default)]
  result: Option<Value>,
  #[serde(default)]
  error: Option<CallableError>,
}

#[derive(Debug, Deserialize)]
struct CallableError {
  message: String,
  #[serde(default)]
  status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VotesEnvelope {
  #[serde(default)]
  votes: HashMap<String, i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmittedReport {
  document_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmittedComment {
  comment_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadedAvatar {
  url: String,
}

/// HTTP implementation of [`RemoteClient`].
#[derive(Clone)]
pub struct HttpRemote {
  client: Client,
  base_url: Url,
  id_token: Option<String>,
}

impl HttpRemote {
  pub fn new(config: &RemoteConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(concat!("citywatch-sync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url: with_trailing_slash(config.base_url.clone()),
      id_token: Config::id_token(),
    })
  }

  async fn call<T: DeserializeOwned>(&self, function: &str, data: Value) -> Result<T, RemoteError> {
    let url = self
      .base_url
      .join(function)
      .map_err(|e| RemoteError::InvalidResponse(format!("bad function url {}: {}", function, e)))?;

    debug!(function, "Calling remote function");

    let mut request = self.client.post(url).json(&json!({ "data": data }));
    if let Some(token) = &self.id_token {
      request = request.bearer_auth(token);
    }

    let response = request
      .send()
      .await
      .map_err(|e| RemoteError::Unavailable(format!("{}: {}", function, e)))?;
    let status = response.status();

    let body: CallableResponse = match response.json().await {
      Ok(body) => body,
      Err(e) if status.is_success() => {
        return Err(RemoteError::InvalidResponse(format!("{}: {}", function, e)));
      }
      Err(_) => return Err(status_error(function, status, None)),
    };

    if let Some(error) = body.error {
      warn!(
        function,
        status = %status,
        code = error.status.as_deref().unwrap_or(""),
        message = %error.message,
        "Remote function returned an error"
      );
      return Err(status_error(function, status, Some(error.message)));
    }
    if !status.is_success() {
      return Err(status_error(function, status, None));
    }

    serde_json::from_value(body.result.unwrap_or(Value::Null))
      .map_err(|e| RemoteError::InvalidResponse(format!("{}: {}", function, e)))
  }

  async fn call_unit(&self, function: &str, data: Value) -> Result<(), RemoteError> {
    let _: Value = self.call(function, data).await?;
    Ok(())
  }
}

/// `Url::join` replaces the last path segment unless the path ends with '/'.
fn with_trailing_slash(mut url: Url) -> Url {
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  url
}

fn status_error(function: &str, status: StatusCode, message: Option<String>) -> RemoteError {
  let message = format!(
    "{} ({}): {}",
    function,
    status,
    message.unwrap_or_else(|| "no error message".to_string())
  );
  if status.is_server_error()
    || status == StatusCode::TOO_MANY_REQUESTS
    || status == StatusCode::REQUEST_TIMEOUT
  {
    RemoteError::Unavailable(message)
  } else {
    RemoteError::Rejected(message)
  }
}

/// Votes outside {-1, 0, 1} are dropped.
fn into_vote_map(envelope: VotesEnvelope) -> VoteMap {
  envelope
    .votes
    .into_iter()
    .filter_map(|(id, raw)| Vote::try_from(raw).ok().map(|v| (id, v)))
    .collect()
}

fn checksum_text(value: Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s),
    other => Some(other.to_string()),
  }
}

#[async_trait]
impl RemoteClient for HttpRemote {
  async fn fetch_reports(&self) -> Result<Vec<Report>, RemoteError> {
    self.call("getAllReports", json!({})).await
  }

  async fn fetch_comments(&self, report_id: &str) -> Result<Vec<Comment>, RemoteError> {
    let mut comments: Vec<Comment> = self
      .call("getCommentsForReport", json!({ "reportId": report_id }))
      .await?;
    for comment in &mut comments {
      if comment.report_id.is_empty() {
        comment.report_id = report_id.to_string();
      }
    }
    Ok(comments)
  }

  async fn fetch_checksums(&self) -> Result<Checksums, RemoteError> {
    let raw: HashMap<String, Value> = self.call("getChecksums", json!({})).await?;
    Ok(
      raw
        .into_iter()
        .filter_map(|(key, value)| checksum_text(value).map(|v| (key, v)))
        .collect(),
    )
  }

  async fn fetch_viewer_votes(
    &self,
    subject: VoteSubject,
    ids: &[String],
    viewer_id: &str,
  ) -> Result<VoteMap, RemoteError> {
    let (function, data) = match subject {
      VoteSubject::Report => (
        "getUserVotesForReports",
        json!({ "reportIds": ids, "userId": viewer_id }),
      ),
      VoteSubject::Comment => (
        "getUserVotesForComments",
        json!({ "commentIds": ids, "userId": viewer_id }),
      ),
    };
    Ok(into_vote_map(self.call(function, data).await?))
  }

  async fn fetch_all_viewer_votes(
    &self,
    subject: VoteSubject,
    viewer_id: &str,
  ) -> Result<VoteMap, RemoteError> {
    let function = match subject {
      VoteSubject::Report => "getAllReportVotesForUser",
      VoteSubject::Comment => "getAllCommentVotesForUser",
    };
    let envelope = self.call(function, json!({ "userId": viewer_id })).await?;
    Ok(into_vote_map(envelope))
  }

  async fn fetch_user_profile(&self, user_id: &str) -> Result<UserProfile, RemoteError> {
    let data = json!({ "userId": user_id });
    let (name, phone): (Option<String>, Option<String>) = futures::try_join!(
      self.call("getUserName", data.clone()),
      self.call("getUserPhone", data),
    )?;

    Ok(UserProfile {
      user_id: user_id.to_string(),
      name,
      phone,
      email: None,
      avatar_url: None,
      cached_at: 0,
    })
  }

  async fn vote(
    &self,
    subject: VoteSubject,
    subject_id: &str,
    viewer_id: &str,
    vote: Vote,
  ) -> Result<VoteResult, RemoteError> {
    let (function, id_field) = match subject {
      VoteSubject::Report => ("voteReport", "reportId"),
      VoteSubject::Comment => ("voteComment", "commentId"),
    };
    let mut data = json!({ "userId": viewer_id, "voteType": vote.value() });
    data[id_field] = json!(subject_id);
    self.call(function, data).await
  }

  async fn submit_report(
    &self,
    draft: &ReportDraft,
    viewer_id: &str,
  ) -> Result<String, RemoteError> {
    let mut data =
      serde_json::to_value(draft).map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
    data["userId"] = json!(viewer_id);
    let submitted: SubmittedReport = self.call("submitReport", data).await?;
    Ok(submitted.document_id)
  }

  async fn upload_report_photo(
    &self,
    report_id: &str,
    image_base64: &str,
  ) -> Result<(), RemoteError> {
    self
      .call_unit(
        "uploadReportPhoto",
        json!({ "documentId": report_id, "imageBase64": image_base64 }),
      )
      .await
  }

  async fn edit_report(
    &self,
    report_id: &str,
    viewer_id: &str,
    draft: &ReportDraft,
    status: ReportStatus,
  ) -> Result<(), RemoteError> {
    let mut data =
      serde_json::to_value(draft).map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
    data["reportId"] = json!(report_id);
    data["userId"] = json!(viewer_id);
    data["status"] = json!(status.as_str());
    self.call_unit("editReport", data).await
  }

  async fn update_report_status(
    &self,
    report_id: &str,
    viewer_id: &str,
    status: ReportStatus,
  ) -> Result<(), RemoteError> {
    self
      .call_unit(
        "updateReportStatus",
        json!({ "reportId": report_id, "newStatus": status.as_str(), "userId": viewer_id }),
      )
      .await
  }

  async fn delete_report(&self, report_id: &str, viewer_id: &str) -> Result<(), RemoteError> {
    self
      .call_unit(
        "deleteReport",
        json!({ "reportId": report_id, "userId": viewer_id }),
      )
      .await
  }

  async fn submit_comment(
    &self,
    content: &str,
    report_id: &str,
    viewer_id: &str,
  ) -> Result<String, RemoteError> {
    let submitted: SubmittedComment = self
      .call(
        "submitComment",
        json!({ "content": content, "reportId": report_id, "userId": viewer_id }),
      )
      .await?;
    Ok(submitted.comment_id)
  }

  async fn edit_comment(
    &self,
    comment_id: &str,
    viewer_id: &str,
    content: &str,
  ) -> Result<(), RemoteError> {
    self
      .call_unit(
        "editComment",
        json!({ "commentId": comment_id, "userId": viewer_id, "content": content }),
      )
      .await
  }

  async fn delete_comment(&self, comment_id: &str, viewer_id: &str) -> Result<(), RemoteError> {
    self
      .call_unit(
        "deleteComment",
        json!({ "commentId": comment_id, "userId": viewer_id }),
      )
      .await
  }

  async fn update_display_name(&self, user_id: &str, name: &str) -> Result<(), RemoteError> {
    self
      .call_unit(
        "updateUserName",
        json!({ "userId": user_id, "newName": name }),
      )
      .await
  }

  async fn update_phone(&self, user_id: &str, phone: &str) -> Result<(), RemoteError> {
    self
      .call_unit(
        "updateUserPhone",
        json!({ "userId": user_id, "newPhone": phone }),
      )
      .await
  }

  async fn upload_avatar(&self, user_id: &str, image_base64: &str) -> Result<String, RemoteError> {
    let uploaded: UploadedAvatar = self
      .call(
        "uploadProfilePicture",
        json!({ "userId": user_id, "imageBase64": image_base64 }),
      )
      .await?;
    Ok(uploaded.url)
  }
}
