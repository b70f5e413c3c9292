//! Inbound event payloads.
//!
//! Only the fields the relay reads are modelled; a payload missing one of
//! them fails to decode and is rejected as malformed.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::build::{BuildId, BuildStatus};
use crate::error::RelayError;

#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub after: String,
    #[serde(default)]
    pub deleted: bool,
    /// Null on branch deletion pushes.
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
    pub pusher: Pusher,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadCommit {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pusher {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub head: PullRequestHead,
    pub user: GitHubUser,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestHead {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

/// A source-control event that may start a build.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Push(PushEvent),
    PullRequest(PullRequestEvent),
}

impl SourceEvent {
    /// Decode a webhook body by its `X-GitHub-Event` name.
    ///
    /// Returns `Ok(None)` for event types the relay does not build on.
    pub fn parse(event_type: &str, body: &[u8]) -> Result<Option<Self>, RelayError> {
        match event_type {
            "push" => decode(body).map(|e| Some(Self::Push(e))),
            "pull_request" => decode(body).map(|e| Some(Self::PullRequest(e))),
            _ => Ok(None),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Push(_) => "push",
            Self::PullRequest(_) => "pull_request",
        }
    }
}

/// Completion notice from the build service.
///
/// Accepts `{"buildId": ..}`, `{"codebuildId": ..}` or a CloudWatch state
/// change envelope carrying `detail.build-id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildCallback {
    #[serde(rename = "buildId", default)]
    pub build_id: Option<String>,
    #[serde(rename = "codebuildId", default)]
    pub codebuild_id: Option<String>,
    #[serde(default)]
    pub detail: Option<CallbackDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackDetail {
    #[serde(rename = "build-id")]
    pub build_id: Option<String>,
    #[serde(rename = "build-status", default)]
    pub build_status: Option<String>,
}

impl BuildCallback {
    pub fn build_id(&self) -> Result<BuildId, RelayError> {
        let raw = self
            .build_id
            .as_deref()
            .or(self.codebuild_id.as_deref())
            .or_else(|| self.detail.as_ref()?.build_id.as_deref())
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| RelayError::MissingField("buildId".to_string()))?;

        // CloudWatch sends the build ARN: arn:aws:codebuild:<region>:<account>:build/<id>
        let id = raw.rsplit_once(":build/").map_or(raw, |(_, id)| id);
        Ok(BuildId::new(id))
    }

    /// Build status announced by a state change envelope, if any.
    pub fn announced_status(&self) -> Option<BuildStatus> {
        self.detail
            .as_ref()?
            .build_status
            .as_deref()
            .filter(|code| !code.trim().is_empty())
            .map(BuildStatus::from_code)
    }
}

/// Manual rebuild of a previous build.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RebuildRequest {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(rename = "buildId", default)]
    pub build_id: Option<String>,
}

impl RebuildRequest {
    pub fn build_id(&self) -> Result<BuildId, RelayError> {
        self.build_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(BuildId::new)
            .ok_or_else(|| RelayError::MissingField("buildId".to_string()))
    }
}

pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, RelayError> {
    serde_json::from_slice(body).map_err(|e| RelayError::MalformedPayload(e.to_string()))
}
