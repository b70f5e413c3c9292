//! Relay configuration: loaded from environment variables.
//!
//! List settings are JSON arrays, map settings JSON objects. Everything is
//! read once at start-up and shared immutably afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::services::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is not valid JSON: {source}")]
    InvalidJson {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{key} must be a non-negative integer, got `{value}`")]
    InvalidNumber { key: &'static str, value: String },
}

/// Build image to use instead of the project default for a set of branches.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ImageOverride {
    pub branches: Vec<String>,
    pub image: String,
}

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct CodeBuildConfig {
    pub region: String,
    /// CodeBuild project that receives submissions. Without it the relay can
    /// still report on builds but cannot start them.
    pub project_name: Option<String>,
    pub endpoint: String,
    pub credentials: Option<AwsCredentials>,
}

#[derive(Clone, Debug)]
pub struct GitHubConfig {
    /// Token for the commit status API. Empty disables status updates.
    pub token: String,
    /// `owner/name` of the repository whose commits receive statuses.
    pub repository: String,
    pub status_context: String,
    pub api_url: String,
    /// Secret for webhook HMAC validation. Empty disables validation.
    pub webhook_secret: String,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    /// Incoming webhook URL. Absent means failure notifications are skipped.
    pub webhook_url: Option<String>,
    pub username: String,
    pub channel: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Branches that never get a build.
    pub branches_to_exclude: HashSet<String>,
    /// Branches that never get a review environment.
    pub review_branches_to_exclude: HashSet<String>,
    pub branch_environments: HashMap<String, String>,
    pub review_trigger: String,
    pub image_overrides: Vec<ImageOverride>,
    pub rebuild_key: Option<String>,
    pub rebuild_url: Option<String>,
    pub always_rebuild_branches: HashSet<String>,
    /// Failures on these branches always go to the team channel.
    pub generic_report_branches: HashSet<String>,
    /// Source-control username → chat handle.
    pub chat_handles: HashMap<String, String>,
    pub slack: SlackConfig,
    pub codebuild: CodeBuildConfig,
    pub github: GitHubConfig,
    pub poll: RetryPolicy,
}

const PROTECTED_BRANCHES: &[&str] = &["staging", "master"];

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key → value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let branches_to_exclude = json_or(&get, "BRANCHES_TO_EXCLUDE", || {
            strings(PROTECTED_BRANCHES)
        })?;
        let review_branches_to_exclude =
            json_or(&get, "REVIEW_ENVIRONMENT_BRANCHES_TO_EXCLUDE", || {
                strings(PROTECTED_BRANCHES)
            })?;
        let branch_environments = json_or(&get, "BRANCH_ENVIRONMENTS", || {
            HashMap::from([
                ("master".to_string(), "production".to_string()),
                ("staging".to_string(), "staging".to_string()),
            ])
        })?;
        let image_overrides = json_or(&get, "BRANCH_IMAGE_OVERRIDE", Vec::new)?;
        let always_rebuild_branches =
            json_or(&get, "BRANCHES_TO_ALWAYS_ALLOW_REBUILDS", HashSet::new)?;
        let generic_report_branches = json_or(&get, "BRANCHES_TO_GENERIC_REPORT", || {
            strings(PROTECTED_BRANCHES)
        })?;
        let chat_handles = json_or(&get, "GITHUB_SLACK_USERNAMES", HashMap::new)?;

        let region = get("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());
        let endpoint = get("CODEBUILD_ENDPOINT")
            .unwrap_or_else(|| format!("https://codebuild.{region}.amazonaws.com"));
        let credentials = match (get("AWS_ACCESS_KEY_ID"), get("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) => Some(AwsCredentials {
                access_key_id,
                secret_access_key,
                session_token: get("AWS_SESSION_TOKEN"),
            }),
            _ => None,
        };

        let defaults = RetryPolicy::default();
        let poll = RetryPolicy {
            max_attempts: number_or(&get, "POLL_MAX_ATTEMPTS", defaults.max_attempts as u64)?
                as usize,
            base_delay: Duration::from_millis(number_or(
                &get,
                "POLL_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(number_or(
                &get,
                "POLL_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )?),
            deadline: Duration::from_secs(number_or(
                &get,
                "POLL_DEADLINE_SECS",
                defaults.deadline.as_secs(),
            )?),
        };

        let config = Self {
            branches_to_exclude,
            review_branches_to_exclude,
            branch_environments,
            review_trigger: get("REVIEW_ENVIRONMENT_TRIGGER")
                .unwrap_or_else(|| "[review]".to_string()),
            image_overrides,
            rebuild_key: get("REBUILD_KEY"),
            rebuild_url: get("REBUILD_URL"),
            always_rebuild_branches,
            generic_report_branches,
            chat_handles,
            slack: SlackConfig {
                webhook_url: get("SLACK_URL"),
                username: get("SLACK_USERNAME").unwrap_or_else(|| "buildbot".to_string()),
                channel: get("SLACK_CHANNEL"),
            },
            codebuild: CodeBuildConfig {
                region,
                project_name: get("CODEBUILD_PROJECT"),
                endpoint,
                credentials,
            },
            github: GitHubConfig {
                token: get("GITHUB_TOKEN").unwrap_or_default(),
                repository: get("GITHUB_REPOSITORY").unwrap_or_default(),
                status_context: get("GITHUB_STATUS_CONTEXT")
                    .unwrap_or_else(|| "continuous-integration/codebuild".to_string()),
                api_url: get("GITHUB_API_URL")
                    .unwrap_or_else(|| "https://api.github.com".to_string()),
                webhook_secret: get("GITHUB_WEBHOOK_SECRET").unwrap_or_default(),
            },
            poll,
        };

        config.warn_missing();
        Ok(config)
    }

    fn warn_missing(&self) {
        if self.github.webhook_secret.is_empty() {
            tracing::warn!("GITHUB_WEBHOOK_SECRET not set -- webhook signature validation disabled");
        }
        if self.github.token.is_empty() || self.github.repository.is_empty() {
            tracing::warn!("GITHUB_TOKEN or GITHUB_REPOSITORY not set -- status updates disabled");
        }
        if self.codebuild.project_name.is_none() {
            tracing::warn!("CODEBUILD_PROJECT not set -- build submission disabled");
        }
        if self.codebuild.credentials.is_none() {
            tracing::warn!("AWS credentials not set -- CodeBuild requests will be unsigned");
        }
        if self.slack.webhook_url.is_none() {
            tracing::info!("SLACK_URL not set -- failure notifications disabled");
        }
    }

    /// Deploy environment for a branch, if one is mapped.
    pub fn environment_for(&self, branch: &str) -> Option<&str> {
        self.branch_environments.get(branch).map(String::as_str)
    }

    pub fn image_override_for(&self, branch: &str) -> Option<&str> {
        self.image_overrides
            .iter()
            .find(|o| o.branches.iter().any(|b| b == branch))
            .map(|o| o.image.as_str())
    }

    pub fn chat_handle_for(&self, committer: &str) -> Option<&str> {
        self.chat_handles.get(committer).map(String::as_str)
    }

    /// Console page for a build.
    pub fn build_url(&self, build_id: &str) -> String {
        build_console_url(&self.codebuild.region, build_id)
    }

    /// Rebuild link, only when both the base URL and the key are configured.
    pub fn rebuild_link(&self, build_id: &str) -> Option<String> {
        let (Some(url), Some(key)) = (&self.rebuild_url, &self.rebuild_key) else {
            return None;
        };
        match reqwest::Url::parse_with_params(url, [("buildId", build_id), ("key", key.as_str())]) {
            Ok(link) => Some(link.into()),
            Err(e) => {
                tracing::warn!("REBUILD_URL is not a valid URL, omitting rebuild link: {e}");
                None
            }
        }
    }
}

/// CodeBuild console page for a build.
pub fn build_console_url(region: &str, build_id: &str) -> String {
    format!("https://console.aws.amazon.com/codebuild/home?region={region}#/builds/{build_id}/view/new")
}

fn strings<C: FromIterator<String>>(values: &[&str]) -> C {
    values.iter().map(|v| v.to_string()).collect()
}

fn json_or<T, G, D>(get: &G, key: &'static str, default: D) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
    G: Fn(&str) -> Option<String>,
    D: FnOnce() -> T,
{
    match get(key) {
        Some(raw) => {
            serde_json::from_str(&raw).map_err(|source| ConfigError::InvalidJson { key, source })
        }
        None => Ok(default()),
    }
}

fn number_or<G>(get: &G, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        None => Ok(default),
    }
}
