//! Build outcome reporting.
//!
//! Polls the build service until a build completes, publishes the commit
//! status, and notifies chat when the build failed.

use serde::Serialize;

use crate::error::RelayError;
use crate::models::build::{BuildId, BuildRecord, BuildStatus};
use crate::models::status::{CommitState, StatusReceipt, StatusUpdate, ERROR_MESSAGE};
use crate::services::notification_service::failure_notification;
use crate::services::retry::{poll_until, Exhausted};
use crate::services::Relay;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
    /// The build completed and its status was published.
    Reported {
        build_id: BuildId,
        build_status: String,
        attempts: usize,
        update: StatusUpdate,
        receipt: StatusReceipt,
        notified: bool,
    },
    /// Polling gave up before the build completed.
    Degraded {
        build_id: BuildId,
        attempts: usize,
        error: String,
        update: Option<StatusUpdate>,
        receipt: Option<StatusReceipt>,
    },
    /// A state change callback announced a build that is still running.
    Skipped {
        build_id: BuildId,
        build_status: String,
    },
}

/// Wait for a build to finish and relay its outcome.
///
/// Exhausting the poll budget is not an error: the result is a
/// [`ReportOutcome::Degraded`] carrying the last problem seen. A failure of
/// the final status update is returned to the caller.
pub async fn report(relay: &Relay, build_id: &BuildId) -> Result<ReportOutcome, RelayError> {
    let polled = poll_until(
        &relay.config.poll,
        move |attempt| {
            tracing::info!(build_id = %build_id, attempt, "Checking build status");
            crate::metrics::poll_attempt();
            relay.builds.fetch(build_id)
        },
        |record: &BuildRecord| record.build_status.is_reportable(),
    )
    .await;

    match polled {
        Ok(polled) => {
            let record = polled.value;
            tracing::info!(
                build_id = %build_id,
                status = %record.build_status,
                attempts = polled.attempts,
                "Build reached a final state"
            );
            let notified = notify_failure(relay, &record).await;
            let update =
                StatusUpdate::for_status(&record.build_status, &record.source_version, &record.id);
            let receipt = relay.statuses.update(&update).await?;
            crate::metrics::build_reported(update.state.as_str());
            crate::metrics::report_attempts(polled.attempts);

            Ok(ReportOutcome::Reported {
                build_id: record.id.clone(),
                build_status: record.build_status.to_string(),
                attempts: polled.attempts,
                update,
                receipt,
                notified,
            })
        }
        Err(exhausted) => Ok(degrade(relay, build_id, exhausted).await),
    }
}

async fn degrade(
    relay: &Relay,
    build_id: &BuildId,
    exhausted: Exhausted<BuildRecord, RelayError>,
) -> ReportOutcome {
    let error = match (&exhausted.last_error, &exhausted.last_observed) {
        (Some(err), _) => err.to_string(),
        (None, Some(record)) => format!("build still {}", record.build_status),
        (None, None) => "no build status observed".to_string(),
    };
    let error = if exhausted.deadline_reached {
        format!("deadline reached after {} attempts: {error}", exhausted.attempts)
    } else {
        format!("gave up after {} attempts: {error}", exhausted.attempts)
    };
    tracing::error!(build_id = %build_id, "Build outcome unknown, {error}");
    crate::metrics::build_reported("degraded");
    crate::metrics::report_attempts(exhausted.attempts);

    // Without a record there is no commit to attach a status to.
    let Some(record) = exhausted.last_observed else {
        return ReportOutcome::Degraded {
            build_id: build_id.clone(),
            attempts: exhausted.attempts,
            error,
            update: None,
            receipt: None,
        };
    };

    let update = StatusUpdate::new(
        CommitState::Error,
        ERROR_MESSAGE,
        &record.source_version,
        &record.id,
    );
    let receipt = match relay.statuses.update(&update).await {
        Ok(receipt) => receipt,
        Err(e) => {
            tracing::warn!(build_id = %build_id, "Error status update failed: {e}");
            StatusReceipt::Failed {
                reason: e.to_string(),
            }
        }
    };

    ReportOutcome::Degraded {
        build_id: build_id.clone(),
        attempts: exhausted.attempts,
        error,
        update: Some(update),
        receipt: Some(receipt),
    }
}

/// Send the failure notification for a failed build. Returns whether one was delivered.
async fn notify_failure(relay: &Relay, record: &BuildRecord) -> bool {
    if record.build_status != BuildStatus::Failed {
        return false;
    }
    if !relay.chat.is_enabled() {
        tracing::debug!(build_id = %record.id, "Chat webhook not configured, skipping failure notification");
        return false;
    }

    let (target, notification) = failure_notification(&relay.config, record);
    let channel = target.channel();
    match relay.chat.send(channel.as_deref(), &notification).await {
        Ok(()) => {
            tracing::info!(build_id = %record.id, channel = ?channel, "Failure notification sent");
            crate::metrics::chat_notification("sent");
            true
        }
        Err(e) => {
            tracing::warn!(build_id = %record.id, "Failure notification not delivered: {e}");
            crate::metrics::chat_notification("failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config_with;
    use crate::models::notification::ChatTarget;
    use crate::services::testing::{
        fast_poll, record, FakeBuildService, FetchStep, Harness, RecordingChat, RecordingStatus,
    };

    const VARS: &[(&str, &str)] = &[("BRANCH", "feature-x"), ("COMMITTER", "alice")];

    fn step(status: &str) -> FetchStep {
        FetchStep::Record(record("app:1", status, VARS))
    }

    #[tokio::test]
    async fn pending_pending_succeeded_reports_success_on_third_poll() {
        let harness = Harness::new(
            config_with(&[]),
            FakeBuildService::with_script(vec![step("PENDING"), step("PENDING"), step("SUCCEEDED")]),
        );

        let outcome = report(&harness.relay, &BuildId::new("app:1")).await.unwrap();

        let ReportOutcome::Reported {
            attempts,
            update,
            notified,
            ..
        } = outcome
        else {
            panic!("expected report");
        };
        assert_eq!(attempts, 3);
        assert_eq!(harness.builds.fetch_count(), 3);
        assert_eq!(update.state, CommitState::Success);
        assert_eq!(update.message, "Your tests passed on CodeBuild");
        assert_eq!(update.commit_sha, "abc123");
        assert!(!notified);
        assert_eq!(harness.statuses.updates(), vec![update]);
        assert!(harness.chat.sent().is_empty());
    }

    #[tokio::test]
    async fn stuck_build_degrades_with_error_status() {
        let mut config = config_with(&[]);
        config.poll = fast_poll(4);
        let harness = Harness::new(config, FakeBuildService::with_script(vec![step("IN_PROGRESS")]));

        let outcome = report(&harness.relay, &BuildId::new("app:1")).await.unwrap();

        let ReportOutcome::Degraded {
            attempts,
            error,
            update,
            ..
        } = outcome
        else {
            panic!("expected degraded outcome");
        };
        assert_eq!(attempts, 4);
        assert_eq!(harness.builds.fetch_count(), 4);
        assert!(error.contains("IN_PROGRESS"), "{error}");
        let update = update.expect("error status");
        assert_eq!(update.state, CommitState::Error);
        assert_eq!(harness.statuses.updates().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_build_service_degrades_without_status() {
        let mut config = config_with(&[]);
        config.poll = fast_poll(3);
        let harness = Harness::new(
            config,
            FakeBuildService::with_script(vec![FetchStep::Fail("connection refused".into())]),
        );

        let outcome = report(&harness.relay, &BuildId::new("app:1")).await.unwrap();

        let ReportOutcome::Degraded { error, update, .. } = outcome else {
            panic!("expected degraded outcome");
        };
        assert!(error.contains("connection refused"), "{error}");
        assert!(update.is_none());
        assert!(harness.statuses.updates().is_empty());
    }

    #[tokio::test]
    async fn transient_fetch_error_is_retried() {
        let harness = Harness::new(
            config_with(&[]),
            FakeBuildService::with_script(vec![FetchStep::Fail("throttled".into()), step("FAILED")]),
        );
        let outcome = report(&harness.relay, &BuildId::new("app:1")).await.unwrap();
        assert!(matches!(outcome, ReportOutcome::Reported { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn failed_build_notifies_chat_and_reports_failure() {
        let config = config_with(&[
            ("GITHUB_SLACK_USERNAMES", r#"{"alice":"alice.s"}"#),
            ("SLACK_URL", "https://hooks.slack.example/T/B/X"),
        ]);
        let harness = Harness::new(config, FakeBuildService::with_script(vec![step("FAILED")]));

        let outcome = report(&harness.relay, &BuildId::new("app:1")).await.unwrap();

        let ReportOutcome::Reported { update, notified, .. } = outcome else {
            panic!("expected report");
        };
        assert!(notified);
        assert_eq!(update.state, CommitState::Failure);
        assert_eq!(update.message, "Your tests failed on CodeBuild");

        let sent = harness.chat.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChatTarget::Direct("alice.s".into()).channel());
        assert_eq!(sent[0].1.title, "Your build failed");
    }

    #[tokio::test]
    async fn error_status_is_reported_without_notification() {
        let harness = Harness::new(config_with(&[]), FakeBuildService::with_script(vec![step("FAULT")]));
        let outcome = report(&harness.relay, &BuildId::new("app:1")).await.unwrap();

        let ReportOutcome::Reported { update, notified, .. } = outcome else {
            panic!("expected report");
        };
        assert_eq!(update.state, CommitState::Error);
        assert_eq!(update.message, "There was an error running your tests");
        assert!(!notified);
        assert!(harness.chat.sent().is_empty());
    }

    #[tokio::test]
    async fn disabled_chat_is_silently_skipped() {
        let harness = Harness::with(
            config_with(&[]),
            FakeBuildService::with_script(vec![step("FAILED")]),
            RecordingStatus::default(),
            RecordingChat {
                enabled: false,
                ..Default::default()
            },
        );
        let outcome = report(&harness.relay, &BuildId::new("app:1")).await.unwrap();
        assert!(matches!(outcome, ReportOutcome::Reported { notified: false, .. }));
        assert!(harness.chat.sent().is_empty());
        assert_eq!(harness.statuses.updates().len(), 1);
    }

    #[tokio::test]
    async fn chat_failure_does_not_block_status_update() {
        let harness = Harness::with(
            config_with(&[]),
            FakeBuildService::with_script(vec![step("FAILED")]),
            RecordingStatus::default(),
            RecordingChat {
                fail: true,
                ..Default::default()
            },
        );
        let outcome = report(&harness.relay, &BuildId::new("app:1")).await.unwrap();

        assert!(matches!(outcome, ReportOutcome::Reported { notified: false, .. }));
        assert_eq!(harness.chat.sent().len(), 1);
        assert_eq!(harness.statuses.updates()[0].state, CommitState::Failure);
    }

    #[tokio::test]
    async fn status_update_failure_is_propagated() {
        let harness = Harness::with(
            config_with(&[]),
            FakeBuildService::with_script(vec![step("SUCCEEDED")]),
            RecordingStatus {
                fail: true,
                ..Default::default()
            },
            RecordingChat::default(),
        );
        let err = report(&harness.relay, &BuildId::new("app:1"))
            .await
            .expect_err("status failed");
        assert!(matches!(err, RelayError::Status(_)));
    }
}
