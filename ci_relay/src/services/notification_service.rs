//! Failure message construction and targeting.

use crate::config::RelayConfig;
use crate::models::build::BuildRecord;
use crate::models::notification::{ChatTarget, FailureNotification, NotificationField};

/// Build the failure message for a record and decide who receives it.
///
/// A committer with a known chat handle gets a direct message unless the
/// branch is one that is always reported to the team.
pub fn failure_notification(
    config: &RelayConfig,
    record: &BuildRecord,
) -> (ChatTarget, FailureNotification) {
    let branch = record.branch();
    let committer = record.committer();
    let build_id = record.id.as_str();

    let handle = config
        .chat_handle_for(committer)
        .filter(|_| !config.generic_report_branches.contains(branch));

    let mut links = format!("<{}|See more>", config.build_url(build_id));
    if let Some(rebuild) = config.rebuild_link(build_id) {
        links.push_str(&format!(" or <{rebuild}|Rebuild>"));
    }

    let mut fields = vec![
        NotificationField::titled("Build ID", build_id),
        NotificationField::short("Branch", branch),
    ];

    let (target, title) = match handle {
        Some(handle) => (ChatTarget::Direct(handle.to_string()), "Your build failed"),
        None => {
            fields.push(NotificationField::short("Committer", committer));
            (ChatTarget::Channel(config.slack.channel.clone()), "Build failed")
        }
    };
    fields.push(NotificationField::untitled(links));

    (
        target,
        FailureNotification {
            title: title.to_string(),
            color: "danger".to_string(),
            fields,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config_with;
    use crate::services::testing::{field, record};

    const HANDLES: (&str, &str) = ("GITHUB_SLACK_USERNAMES", r##"{"alice":"alice.s"}"##);

    fn failed(branch: &str, committer: &str) -> BuildRecord {
        record(
            "app:9",
            "FAILED",
            &[("BRANCH", branch), ("COMMITTER", committer)],
        )
    }

    #[test]
    fn mapped_committer_gets_direct_message_without_name() {
        let config = config_with(&[HANDLES, ("SLACK_CHANNEL", "#builds")]);
        let (target, message) = failure_notification(&config, &failed("feature-x", "alice"));

        assert_eq!(target, ChatTarget::Direct("alice.s".into()));
        assert_eq!(target.channel().as_deref(), Some("@alice.s"));
        assert_eq!(message.title, "Your build failed");
        assert_eq!(message.color, "danger");
        assert_eq!(field(&message, "Build ID"), Some("app:9"));
        assert_eq!(field(&message, "Branch"), Some("feature-x"));
        assert_eq!(field(&message, "Committer"), None);
        assert!(!message
            .fields
            .iter()
            .any(|f| f.value.contains("alice") && f.title.is_some()));
    }

    #[test]
    fn unmapped_committer_gets_generic_message_with_name() {
        let config = config_with(&[HANDLES, ("SLACK_CHANNEL", "#builds")]);
        let (target, message) = failure_notification(&config, &failed("feature-x", "bob"));

        assert_eq!(target, ChatTarget::Channel(Some("#builds".into())));
        assert_eq!(message.title, "Build failed");
        assert_eq!(field(&message, "Committer"), Some("bob"));
    }

    #[test]
    fn protected_branch_is_always_generic() {
        let config = config_with(&[HANDLES]);
        let (target, message) = failure_notification(&config, &failed("master", "alice"));

        assert_eq!(target, ChatTarget::Channel(None));
        assert_eq!(field(&message, "Committer"), Some("alice"));
    }

    #[test]
    fn link_line_has_console_url() {
        let config = config_with(&[("AWS_REGION", "eu-west-1")]);
        let (_, message) = failure_notification(&config, &failed("feature-x", "bob"));
        let links = &message.fields.last().unwrap().value;

        assert_eq!(
            links,
            "<https://console.aws.amazon.com/codebuild/home?region=eu-west-1#/builds/app:9/view/new|See more>"
        );
    }

    #[test]
    fn rebuild_link_needs_url_and_key() {
        let url_only = config_with(&[("REBUILD_URL", "https://relay.example/rebuild")]);
        let (_, message) = failure_notification(&url_only, &failed("feature-x", "bob"));
        assert!(!message.fields.last().unwrap().value.contains("Rebuild"));

        let both = config_with(&[
            ("REBUILD_URL", "https://relay.example/rebuild"),
            ("REBUILD_KEY", "k3y"),
        ]);
        let (_, message) = failure_notification(&both, &failed("feature-x", "bob"));
        assert!(message
            .fields
            .last()
            .unwrap()
            .value
            .ends_with(" or <https://relay.example/rebuild?buildId=app%3A9&key=k3y|Rebuild>"));
    }

    #[test]
    fn missing_variables_render_placeholders() {
        let config = config_with(&[]);
        let (_, message) = failure_notification(&config, &record("app:9", "FAILED", &[]));
        assert_eq!(field(&message, "Branch"), Some("(branch unavailable)"));
        assert_eq!(field(&message, "Committer"), Some("(committer unavailable)"));
    }
}
