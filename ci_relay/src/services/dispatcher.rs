//! Event dispatch: decides whether a source event starts a build.

use std::fmt;

use serde::Serialize;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::models::build::{BuildId, BuildRequest};
use crate::models::event::{PullRequestEvent, PushEvent, SourceEvent};
use crate::models::status::{StatusReceipt, StatusUpdate};
use crate::services::Relay;

/// Branch names end up in review environment hostnames, so they must be
/// valid DNS labels for certificate issuance.
const DNS_UNSAFE_BRANCH_CHARS: &[char] = &['_', '/'];

const BUILD_ACTIONS: &[&str] = &["opened", "reopened"];

/// Why an event did not start a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    BranchDeleted { branch: String },
    IgnoredAction { action: String },
    BranchExcluded { branch: String },
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::BranchDeleted { .. } => "branch_deleted",
            Self::IgnoredAction { .. } => "ignored_action",
            Self::BranchExcluded { .. } => "branch_excluded",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BranchDeleted { branch } => write!(f, "Branch {branch} deleted, not building"),
            Self::IgnoredAction { action } => {
                write!(f, "Pull request action {action} does not trigger builds")
            }
            Self::BranchExcluded { branch } => write!(f, "Not building {branch}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    Build(BuildRequest),
}

/// A build that was started, and what the status endpoint made of it.
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedBuild {
    pub build_id: BuildId,
    pub request: BuildRequest,
    pub status: StatusReceipt,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Dispatch {
    Skipped(SkipReason),
    Submitted(SubmittedBuild),
}

/// Turn one source event into zero or one build request.
pub fn decide(config: &RelayConfig, event: &SourceEvent) -> Result<Decision, RelayError> {
    match event {
        SourceEvent::Push(push) => decide_push(config, push),
        SourceEvent::PullRequest(pr) => Ok(decide_pull_request(config, pr)),
    }
}

fn decide_push(config: &RelayConfig, push: &PushEvent) -> Result<Decision, RelayError> {
    let branch = branch_name(&push.git_ref);
    if push.deleted {
        return Ok(Decision::Skip(SkipReason::BranchDeleted {
            branch: branch.to_string(),
        }));
    }

    let message = push
        .head_commit
        .as_ref()
        .map(|commit| commit.message.as_str())
        .ok_or_else(|| RelayError::MissingField("head_commit".to_string()))?;
    if push.after.trim().is_empty() {
        return Err(RelayError::MissingField("after".to_string()));
    }

    Ok(build_or_skip(config, branch, &push.after, &push.pusher.name, message))
}

fn decide_pull_request(config: &RelayConfig, pr: &PullRequestEvent) -> Decision {
    if !BUILD_ACTIONS.contains(&pr.action.as_str()) {
        return Decision::Skip(SkipReason::IgnoredAction {
            action: pr.action.clone(),
        });
    }

    let head = &pr.pull_request.head;
    build_or_skip(
        config,
        branch_name(&head.git_ref),
        &head.sha,
        &pr.pull_request.user.login,
        &pr.pull_request.title,
    )
}

fn build_or_skip(
    config: &RelayConfig,
    branch: &str,
    commit_sha: &str,
    committer: &str,
    message: &str,
) -> Decision {
    if config.branches_to_exclude.contains(branch) {
        return Decision::Skip(SkipReason::BranchExcluded {
            branch: branch.to_string(),
        });
    }

    Decision::Build(BuildRequest {
        commit_sha: commit_sha.to_string(),
        target_environment: config.environment_for(branch).map(str::to_string),
        committer: committer.to_string(),
        branch: branch.to_string(),
        is_review_environment: wants_review_environment(config, branch, message),
    })
}

/// Strip `refs/heads/` from a git ref.
pub fn branch_name(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}

pub fn wants_review_environment(config: &RelayConfig, branch: &str, message: &str) -> bool {
    if branch.contains(DNS_UNSAFE_BRANCH_CHARS) {
        return false;
    }
    if config.review_branches_to_exclude.contains(branch) {
        return false;
    }
    message.contains(config.review_trigger.as_str())
}

/// Decide on an event and, when it warrants one, start the build.
pub async fn dispatch(relay: &Relay, event: &SourceEvent) -> Result<Dispatch, RelayError> {
    match decide(&relay.config, event)? {
        Decision::Skip(reason) => {
            tracing::info!(event = event.kind(), reason = reason.label(), "{reason}");
            crate::metrics::dispatch_skipped(reason.label());
            Ok(Dispatch::Skipped(reason))
        }
        Decision::Build(request) => submit_build(relay, request).await.map(Dispatch::Submitted),
    }
}

/// Start a build and mark its commit pending.
///
/// A failed status update is logged but does not hide the started build
/// from the caller.
pub async fn submit_build(relay: &Relay, request: BuildRequest) -> Result<SubmittedBuild, RelayError> {
    let image_override = relay.config.image_override_for(&request.branch);
    let build_id = relay.builds.submit(&request, image_override).await?;

    tracing::info!(
        build_id = %build_id,
        branch = %request.branch,
        committer = %request.committer,
        review_environment = request.is_review_environment,
        "Build submitted"
    );
    crate::metrics::build_submitted();

    let pending = StatusUpdate::pending(&request.commit_sha, &build_id);
    let status = match relay.statuses.update(&pending).await {
        Ok(receipt) => receipt,
        Err(e) => {
            tracing::warn!(build_id = %build_id, "Pending status update failed: {e}");
            StatusReceipt::Failed {
                reason: e.to_string(),
            }
        }
    };

    Ok(SubmittedBuild {
        build_id,
        request,
        status,
    })
}
