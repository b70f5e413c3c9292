//! Public commit statuses and the build-status lookup table.

use serde::{Deserialize, Serialize};

use super::build::{BuildId, BuildStatus};

/// State accepted by the commit status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

impl CommitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }
}

pub const RUNNING_MESSAGE: &str = "CodeBuild is running your tests";
pub const FAILED_MESSAGE: &str = "Your tests failed on CodeBuild";
pub const PASSED_MESSAGE: &str = "Your tests passed on CodeBuild";
pub const ERROR_MESSAGE: &str = "There was an error running your tests";

/// Map a build status to its public state and message.
pub fn public_status(status: &BuildStatus) -> (CommitState, &'static str) {
    match status {
        BuildStatus::Pending | BuildStatus::InProgress | BuildStatus::Other(_) => {
            (CommitState::Pending, RUNNING_MESSAGE)
        }
        BuildStatus::Failed => (CommitState::Failure, FAILED_MESSAGE),
        BuildStatus::Succeeded => (CommitState::Success, PASSED_MESSAGE),
        BuildStatus::Error => (CommitState::Error, ERROR_MESSAGE),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub state: CommitState,
    pub message: String,
    pub commit_sha: String,
    pub build_id: BuildId,
}

impl StatusUpdate {
    pub fn new(state: CommitState, message: &str, commit_sha: &str, build_id: &BuildId) -> Self {
        Self {
            state,
            message: message.to_string(),
            commit_sha: commit_sha.to_string(),
            build_id: build_id.clone(),
        }
    }

    pub fn pending(commit_sha: &str, build_id: &BuildId) -> Self {
        Self::new(CommitState::Pending, RUNNING_MESSAGE, commit_sha, build_id)
    }

    pub fn for_status(status: &BuildStatus, commit_sha: &str, build_id: &BuildId) -> Self {
        let (state, message) = public_status(status);
        Self::new(state, message, commit_sha, build_id)
    }
}

/// What became of a status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StatusReceipt {
    Posted { http_status: u16 },
    Skipped { reason: String },
    /// The update was attempted and failed; recorded where the failure must not abort the caller.
    Failed { reason: String },
}
