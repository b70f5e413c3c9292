//! Relay error taxonomy.
//!
//! Skip conditions (deleted branch, excluded branch, irrelevant PR action) are
//! not errors; they are reported as [`crate::services::dispatcher::Dispatch::Skipped`].
//! Everything here is surfaced to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The inbound payload could not be decoded into the expected event shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A required field (payload key or stored build variable) was absent.
    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("webhook signature mismatch")]
    InvalidSignature,

    /// The rebuild key did not match the configured one.
    #[error("invalid rebuild key")]
    InvalidRebuildKey,

    /// Rebuild requested for a build that neither failed nor sits on an
    /// always-rebuildable branch.
    #[error("build {build_id} did not fail, cannot rebuild")]
    BuildDidNotFail { build_id: String },

    #[error("build {0} not found")]
    BuildNotFound(String),

    /// A collaborator needed for this operation has not been configured.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("build service error: {0}")]
    BuildService(String),

    #[error("status update failed: {0}")]
    Status(String),

    #[error("chat notification failed: {0}")]
    Chat(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl RelayError {
    /// Whether the error describes a bad request rather than an infrastructure fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RelayError::MalformedPayload(_)
                | RelayError::MissingField(_)
                | RelayError::InvalidSignature
                | RelayError::InvalidRebuildKey
                | RelayError::BuildDidNotFail { .. }
                | RelayError::BuildNotFound(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MalformedPayload(_) | RelayError::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }
            RelayError::InvalidSignature => StatusCode::UNAUTHORIZED,
            RelayError::InvalidRebuildKey => StatusCode::FORBIDDEN,
            RelayError::BuildDidNotFail { .. } => StatusCode::CONFLICT,
            RelayError::BuildNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::BuildService(_)
            | RelayError::Status(_)
            | RelayError::Chat(_)
            | RelayError::Http(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_validation() {
            tracing::info!("Request rejected: {self}");
        } else {
            tracing::error!("Request failed: {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
