//! Manual rebuilds of previous builds.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::RelayError;
use crate::models::build::{BuildId, BuildRequest, BuildStatus, BRANCH};
use crate::services::dispatcher::{submit_build, SubmittedBuild};
use crate::services::Relay;

/// Resubmit a previous build with the parameters it was started with.
///
/// Only failed builds can be rebuilt, except on branches configured as
/// always rebuildable. When a rebuild key is configured the caller must
/// present it.
pub async fn rebuild(
    relay: &Relay,
    key: Option<&str>,
    build_id: &BuildId,
) -> Result<SubmittedBuild, RelayError> {
    if let Some(expected) = relay.config.rebuild_key.as_deref() {
        if !key.is_some_and(|presented| key_matches(expected, presented)) {
            crate::metrics::rebuild_outcome("invalid_key");
            return Err(RelayError::InvalidRebuildKey);
        }
    }

    let previous = relay.builds.fetch(build_id).await?;
    let branch = previous.environment_variables.require(BRANCH)?;

    if !relay.config.always_rebuild_branches.contains(branch)
        && previous.build_status != BuildStatus::Failed
    {
        tracing::info!(
            build_id = %build_id,
            branch,
            status = %previous.build_status,
            "Rebuild refused, build did not fail"
        );
        crate::metrics::rebuild_outcome("refused");
        return Err(RelayError::BuildDidNotFail {
            build_id: build_id.to_string(),
        });
    }

    let request = BuildRequest::from_record(&previous)?;
    tracing::info!(build_id = %build_id, branch, "Rebuilding");
    let submitted = submit_build(relay, request).await?;
    crate::metrics::rebuild_outcome("submitted");
    Ok(submitted)
}

/// Constant-time key check: both keys are MACed under the same fixed key and
/// the tags are compared with `verify_slice`.
fn key_matches(expected: &str, presented: &str) -> bool {
    const MAC_KEY: &[u8] = b"ci-relay rebuild key";

    let (Ok(mut expected_mac), Ok(mut presented_mac)) = (
        Hmac::<Sha256>::new_from_slice(MAC_KEY),
        Hmac::<Sha256>::new_from_slice(MAC_KEY),
    ) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    presented_mac.update(presented.as_bytes());
    presented_mac
        .verify_slice(&expected_mac.finalize().into_bytes())
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config_with;
    use crate::models::status::CommitState;
    use crate::services::testing::{record, FakeBuildService, FetchStep, Harness};

    const VARS: &[(&str, &str)] = &[
        ("BRANCH", "develop"),
        ("COMMITTER", "bob"),
        ("DEPLOY_ENVIRONMENT", "qa"),
        ("REVIEW_ENVIRONMENT", "true"),
    ];

    fn previous(status: &str) -> FakeBuildService {
        FakeBuildService::with_script(vec![FetchStep::Record(record("app:7", status, VARS))])
    }

    #[tokio::test]
    async fn failed_build_is_resubmitted_with_recorded_values() {
        let harness = Harness::new(config_with(&[]), previous("FAILED"));

        let submitted = rebuild(&harness.relay, None, &BuildId::new("app:7"))
            .await
            .expect("rebuilt");

        assert_eq!(
            submitted.request,
            BuildRequest {
                commit_sha: "abc123".into(),
                target_environment: Some("qa".into()),
                committer: "bob".into(),
                branch: "develop".into(),
                is_review_environment: true,
            }
        );
        assert_eq!(harness.builds.submissions().len(), 1);
        assert_eq!(harness.statuses.updates()[0].state, CommitState::Pending);
    }

    #[tokio::test]
    async fn succeeded_build_is_refused() {
        let harness = Harness::new(config_with(&[]), previous("SUCCEEDED"));
        let err = rebuild(&harness.relay, None, &BuildId::new("app:7"))
            .await
            .expect_err("did not fail");
        assert!(matches!(err, RelayError::BuildDidNotFail { .. }));
        assert!(harness.builds.submissions().is_empty());
    }

    #[tokio::test]
    async fn always_allowed_branch_rebuilds_regardless_of_status() {
        let config = config_with(&[("BRANCHES_TO_ALWAYS_ALLOW_REBUILDS", r#"["develop"]"#)]);
        let harness = Harness::new(config, previous("SUCCEEDED"));
        rebuild(&harness.relay, None, &BuildId::new("app:7"))
            .await
            .expect("allowed");
        assert_eq!(harness.builds.submissions().len(), 1);
    }

    #[tokio::test]
    async fn configured_key_must_match() {
        let config = config_with(&[("REBUILD_KEY", "k3y")]);
        let harness = Harness::new(config, previous("FAILED"));

        for key in [None, Some("wrong")] {
            let err = rebuild(&harness.relay, key, &BuildId::new("app:7"))
                .await
                .expect_err("bad key");
            assert!(matches!(err, RelayError::InvalidRebuildKey));
        }
        assert_eq!(harness.builds.fetch_count(), 0);

        rebuild(&harness.relay, Some("k3y"), &BuildId::new("app:7"))
            .await
            .expect("good key");
    }

    #[test]
    fn key_check_matches_only_identical_keys() {
        assert!(key_matches("k3y", "k3y"));
        assert!(!key_matches("k3y", "k3Y"));
        assert!(!key_matches("k3y", "k3y "));
        assert!(!key_matches("k3y", ""));
        assert!(!key_matches("k3y", "k3y\0"));
        assert!(key_matches("a&b#c+d", "a&b#c+d"));
    }

    #[tokio::test]
    async fn record_without_committer_is_rejected() {
        let harness = Harness::new(
            config_with(&[]),
            FakeBuildService::with_script(vec![FetchStep::Record(record(
                "app:7",
                "FAILED",
                &[("BRANCH", "develop"), ("DEPLOY_ENVIRONMENT", ""), ("REVIEW_ENVIRONMENT", "false")],
            ))]),
        );
        let err = rebuild(&harness.relay, None, &BuildId::new("app:7"))
            .await
            .expect_err("incomplete record");
        assert!(matches!(err, RelayError::MissingField(ref f) if f == "COMMITTER"));
    }

    #[tokio::test]
    async fn unknown_build_is_not_found() {
        let harness = Harness::new(config_with(&[]), FakeBuildService::default());
        let err = rebuild(&harness.relay, None, &BuildId::new("app:404"))
            .await
            .expect_err("missing");
        assert!(matches!(err, RelayError::BuildNotFound(_)));
    }
}
