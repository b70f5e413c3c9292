//! Build requests we submit and build records we read back.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

pub const BRANCH: &str = "BRANCH";
pub const COMMITTER: &str = "COMMITTER";
pub const DEPLOY_ENVIRONMENT: &str = "DEPLOY_ENVIRONMENT";
pub const REVIEW_ENVIRONMENT: &str = "REVIEW_ENVIRONMENT";

/// Identifier assigned by the build service, e.g. `project:5f0c…`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(String);

impl BuildId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build status as reported by the build service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    /// Anomalous completion: `ERROR`, `FAULT`, `TIMED_OUT` or `STOPPED`.
    Error,
    /// Any code we do not know; treated as still running.
    Other(String),
}

impl BuildStatus {
    pub fn from_code(code: &str) -> Self {
        match code {
            "PENDING" => Self::Pending,
            "IN_PROGRESS" => Self::InProgress,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            "ERROR" | "FAULT" | "TIMED_OUT" | "STOPPED" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Error => "ERROR",
            Self::Other(code) => code,
        }
    }

    /// Whether polling can stop and the outcome be reported.
    pub fn is_reportable(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Error)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

/// Ordered name/value pairs attached to a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentVariables(Vec<EnvironmentVariable>);

impl EnvironmentVariables {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|var| var.name == name)
            .map(|var| var.value.as_str())
    }

    /// Like [`get`](Self::get), but a missing variable is an error.
    pub fn require(&self, name: &str) -> Result<&str, RelayError> {
        self.get(name)
            .ok_or_else(|| RelayError::MissingField(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvironmentVariable> {
        self.0.iter()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for EnvironmentVariables {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| EnvironmentVariable {
                    name: name.into(),
                    value: value.into(),
                })
                .collect(),
        )
    }
}

/// Everything needed to start one build. Built once per triggering event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildRequest {
    pub commit_sha: String,
    pub target_environment: Option<String>,
    pub committer: String,
    pub branch: String,
    pub is_review_environment: bool,
}

impl BuildRequest {
    /// Variables handed to the build; an unmapped environment becomes `""`.
    pub fn environment_variables(&self) -> EnvironmentVariables {
        [
            (BRANCH, self.branch.clone()),
            (COMMITTER, self.committer.clone()),
            (
                DEPLOY_ENVIRONMENT,
                self.target_environment.clone().unwrap_or_default(),
            ),
            (REVIEW_ENVIRONMENT, self.is_review_environment.to_string()),
        ]
        .into_iter()
        .collect()
    }

    /// Reconstruct the request that produced a previous build.
    pub fn from_record(record: &BuildRecord) -> Result<Self, RelayError> {
        let vars = &record.environment_variables;
        let environment = vars.require(DEPLOY_ENVIRONMENT)?;

        Ok(Self {
            commit_sha: record.source_version.clone(),
            target_environment: (!environment.is_empty()).then(|| environment.to_string()),
            committer: vars.require(COMMITTER)?.to_string(),
            branch: vars.require(BRANCH)?.to_string(),
            is_review_environment: vars.require(REVIEW_ENVIRONMENT)?.trim() == "true",
        })
    }
}

/// A build as the build service describes it. Never mutated locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    pub id: BuildId,
    pub source_version: String,
    pub build_status: BuildStatus,
    pub environment_variables: EnvironmentVariables,
}

impl BuildRecord {
    pub fn branch(&self) -> &str {
        self.environment_variables
            .get(BRANCH)
            .unwrap_or("(branch unavailable)")
    }

    pub fn committer(&self) -> &str {
        self.environment_variables
            .get(COMMITTER)
            .unwrap_or("(committer unavailable)")
    }
}
