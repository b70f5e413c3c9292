//! GitHub webhook handler: receives push/PR events, dispatches builds.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use crate::error::RelayError;
use crate::models::event::SourceEvent;
use crate::services::dispatcher::{self, Dispatch};
use crate::services::{github_service, Relay};

pub(crate) fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Handle an incoming GitHub webhook payload.
///
/// 201 when a build was submitted, 200 when the event was skipped or is not
/// one the relay builds on.
pub async fn handle_webhook(
    relay: &Relay,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    let signature = header(headers, "x-hub-signature-256");
    if !github_service::validate_signature(&relay.config.github.webhook_secret, &body, signature) {
        tracing::warn!("Webhook signature validation failed");
        return Err(RelayError::InvalidSignature);
    }

    let event_type = header(headers, "x-github-event");
    if event_type == "ping" {
        tracing::info!("Received GitHub ping webhook");
        return Ok(StatusCode::OK.into_response());
    }

    let Some(event) = SourceEvent::parse(event_type, &body)? else {
        tracing::debug!("Ignoring webhook event: {}", event_type);
        return Ok(StatusCode::OK.into_response());
    };

    let dispatch = dispatcher::dispatch(relay, &event).await?;
    let status = match dispatch {
        Dispatch::Submitted(_) => StatusCode::CREATED,
        Dispatch::Skipped(_) => StatusCode::OK,
    };
    Ok((status, Json(dispatch)).into_response())
}
