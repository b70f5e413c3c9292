//! Relay services: dispatch, reporting, rebuilds, and their collaborators.

pub mod aws_signing;
pub mod build_service;
pub mod dispatcher;
pub mod github_service;
pub mod notification_service;
pub mod rebuild;
pub mod reporter;
pub mod retry;
pub mod slack_service;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::error::RelayError;

use self::build_service::{BuildService, CodeBuildClient};
use self::github_service::{GitHubStatusClient, StatusReporter};
use self::slack_service::{ChatNotifier, SlackWebhookClient};

/// Configuration plus the three collaborators every operation talks to.
///
/// Cheap to clone; nothing inside is mutated after construction.
#[derive(Clone)]
pub struct Relay {
    pub config: Arc<RelayConfig>,
    pub builds: Arc<dyn BuildService>,
    pub statuses: Arc<dyn StatusReporter>,
    pub chat: Arc<dyn ChatNotifier>,
}

impl Relay {
    pub fn new(
        config: Arc<RelayConfig>,
        builds: Arc<dyn BuildService>,
        statuses: Arc<dyn StatusReporter>,
        chat: Arc<dyn ChatNotifier>,
    ) -> Self {
        Self {
            config,
            builds,
            statuses,
            chat,
        }
    }

    /// Wire the CodeBuild, GitHub and Slack clients from configuration.
    pub fn from_config(config: RelayConfig) -> Result<Self, RelayError> {
        let builds = CodeBuildClient::new(&config.codebuild)?;
        let statuses = GitHubStatusClient::new(config.github.clone(), &config.codebuild.region)?;
        let chat = SlackWebhookClient::new(config.slack.clone())?;
        Ok(Self::new(
            Arc::new(config),
            Arc::new(builds),
            Arc::new(statuses),
            Arc::new(chat),
        ))
    }
}
