//! Build service port and its CodeBuild implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{AwsCredentials, CodeBuildConfig};
use crate::error::RelayError;
use crate::models::build::{
    BuildId, BuildRecord, BuildRequest, BuildStatus, EnvironmentVariables,
};
use crate::services::aws_signing::{self, JsonRequest};

/// Starts builds and looks them up.
#[async_trait]
pub trait BuildService: Send + Sync {
    async fn submit(
        &self,
        request: &BuildRequest,
        image_override: Option<&str>,
    ) -> Result<BuildId, RelayError>;

    async fn fetch(&self, id: &BuildId) -> Result<BuildRecord, RelayError>;
}

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const START_BUILD: &str = "CodeBuild_20161006.StartBuild";
const BATCH_GET_BUILDS: &str = "CodeBuild_20161006.BatchGetBuilds";

/// CodeBuild over its JSON 1.1 API.
pub struct CodeBuildClient {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    host: String,
    region: String,
    project_name: Option<String>,
    credentials: Option<AwsCredentials>,
}

impl CodeBuildClient {
    pub fn new(config: &CodeBuildConfig) -> Result<Self, RelayError> {
        let endpoint = reqwest::Url::parse(&config.endpoint).map_err(|e| {
            RelayError::BuildService(format!("invalid endpoint {}: {e}", config.endpoint))
        })?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(RelayError::BuildService(format!(
                    "endpoint {} has no host",
                    config.endpoint
                )))
            }
        };

        let http = reqwest::Client::builder()
            .user_agent("centrix-ci-relay")
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            host,
            region: config.region.clone(),
            project_name: config.project_name.clone(),
            credentials: config.credentials.clone(),
        })
    }

    async fn call<B, R>(&self, target: &str, body: &B) -> Result<R, RelayError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let body = serde_json::to_vec(body)
            .map_err(|e| RelayError::BuildService(format!("encode {target}: {e}")))?;

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", target);

        if let Some(credentials) = &self.credentials {
            let signed = aws_signing::sign(
                credentials,
                &JsonRequest {
                    host: &self.host,
                    region: &self.region,
                    service: "codebuild",
                    target,
                    content_type: CONTENT_TYPE,
                    body: &body,
                },
                chrono::Utc::now(),
            )?;
            request = request
                .header("authorization", signed.authorization)
                .header("x-amz-date", signed.amz_date);
            if let Some(token) = signed.security_token {
                request = request.header("x-amz-security-token", token);
            }
        }

        let resp = request.body(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<AwsErrorBody>(&text)
                .map(|e| format!("{}: {}", e.kind, e.message))
                .unwrap_or(text);
            tracing::warn!(operation = target, %status, "CodeBuild request failed: {detail}");
            return Err(RelayError::BuildService(format!("{target} returned {status}: {detail}")));
        }

        resp.json::<R>()
            .await
            .map_err(|e| RelayError::BuildService(format!("decode {target} response: {e}")))
    }
}

#[async_trait]
impl BuildService for CodeBuildClient {
    async fn submit(
        &self,
        request: &BuildRequest,
        image_override: Option<&str>,
    ) -> Result<BuildId, RelayError> {
        let project_name = self
            .project_name
            .as_deref()
            .ok_or(RelayError::NotConfigured("CODEBUILD_PROJECT"))?;

        let body = StartBuildInput {
            project_name,
            source_version: &request.commit_sha,
            environment_variables_override: request
                .environment_variables()
                .iter()
                .map(|var| WireVariable {
                    name: var.name.clone(),
                    value: var.value.clone(),
                    kind: Some("PLAINTEXT".to_string()),
                })
                .collect(),
            image_override,
        };

        let output: StartBuildOutput = self.call(START_BUILD, &body).await?;
        let id = BuildId::new(output.build.id);
        tracing::info!(build_id = %id, branch = %request.branch, "CodeBuild build started");
        Ok(id)
    }

    async fn fetch(&self, id: &BuildId) -> Result<BuildRecord, RelayError> {
        let body = BatchGetBuildsInput {
            ids: vec![id.as_str()],
        };
        let output: BatchGetBuildsOutput = self.call(BATCH_GET_BUILDS, &body).await?;

        output
            .builds
            .into_iter()
            .next()
            .map(WireBuild::into_record)
            .ok_or_else(|| RelayError::BuildNotFound(id.to_string()))
    }
}

// ── Wire format ──

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartBuildInput<'a> {
    project_name: &'a str,
    source_version: &'a str,
    environment_variables_override: Vec<WireVariable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_override: Option<&'a str>,
}

#[derive(Deserialize)]
struct StartBuildOutput {
    build: WireBuildId,
}

#[derive(Deserialize)]
struct WireBuildId {
    id: String,
}

#[derive(Serialize)]
struct BatchGetBuildsInput<'a> {
    ids: Vec<&'a str>,
}

#[derive(Deserialize)]
struct BatchGetBuildsOutput {
    #[serde(default)]
    builds: Vec<WireBuild>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBuild {
    id: String,
    #[serde(default)]
    source_version: String,
    build_status: String,
    #[serde(default)]
    environment: Option<WireEnvironment>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvironment {
    #[serde(default)]
    environment_variables: Vec<WireVariable>,
}

#[derive(Serialize, Deserialize)]
struct WireVariable {
    name: String,
    value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct AwsErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(default, alias = "Message")]
    message: String,
}

impl WireBuild {
    fn into_record(self) -> BuildRecord {
        let environment_variables: EnvironmentVariables = self
            .environment
            .map(|env| env.environment_variables)
            .unwrap_or_default()
            .into_iter()
            .map(|var| (var.name, var.value))
            .collect();

        BuildRecord {
            id: BuildId::new(self.id),
            source_version: self.source_version,
            build_status: BuildStatus::from_code(&self.build_status),
            environment_variables,
        }
    }
}
