//! GitHub integration: webhook validation and commit status updates.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::{build_console_url, GitHubConfig};
use crate::error::RelayError;
use crate::models::status::{StatusReceipt, StatusUpdate};

type HmacSha256 = Hmac<Sha256>;

/// Validate a GitHub webhook signature (X-Hub-Signature-256).
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        tracing::debug!("Webhook secret not configured, skipping validation");
        return true;
    }

    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Publishes build state against a commit.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn update(&self, update: &StatusUpdate) -> Result<StatusReceipt, RelayError>;
}

/// Commit status API client. Status links point at the build's console page.
pub struct GitHubStatusClient {
    http: reqwest::Client,
    config: GitHubConfig,
    region: String,
}

impl GitHubStatusClient {
    pub fn new(config: GitHubConfig, region: &str) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .user_agent("centrix-ci-relay")
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            config,
            region: region.to_string(),
        })
    }
}

#[async_trait]
impl StatusReporter for GitHubStatusClient {
    async fn update(&self, update: &StatusUpdate) -> Result<StatusReceipt, RelayError> {
        if self.config.token.is_empty() || self.config.repository.is_empty() {
            tracing::debug!("GitHub token or repository not set, skipping status update");
            return Ok(StatusReceipt::Skipped {
                reason: "status updates not configured".to_string(),
            });
        }

        let url = format!(
            "{}/repos/{}/statuses/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.repository,
            update.commit_sha
        );
        let body = serde_json::json!({
            "state": update.state,
            "description": update.message,
            "target_url": build_console_url(&self.region, update.build_id.as_str()),
            "context": self.config.status_context,
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!("GitHub status update failed: {} {}", status, text);
            return Err(RelayError::Status(format!("GitHub returned {status}: {text}")));
        }

        tracing::info!(
            build_id = %update.build_id,
            commit = %update.commit_sha,
            state = update.state.as_str(),
            "Commit status updated"
        );
        Ok(StatusReceipt::Posted {
            http_status: status.as_u16(),
        })
    }
}
