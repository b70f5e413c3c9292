//! Relay HTTP routes: webhook, build callback, rebuild, health.

pub mod webhook;

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::error::RelayError;
use crate::models::event::{decode, BuildCallback, RebuildRequest};
use crate::services::dispatcher::SubmittedBuild;
use crate::services::reporter::{self, ReportOutcome};
use crate::services::{rebuild, Relay};

/// Headroom over the poll deadline so a report can finish inside one request.
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(30);

/// Build the relay's Axum router.
pub fn relay_router(relay: Relay) -> Router {
    let timeout = relay.config.poll.deadline + REQUEST_TIMEOUT_SLACK;

    Router::new()
        .route("/webhook/github", post(webhook_handler))
        .route("/callback/build", post(callback_handler))
        .route("/rebuild", get(rebuild_link_handler).post(rebuild_handler))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    timeout,
                )),
        )
        .with_state(relay)
}

// ── Webhook ──

async fn webhook_handler(
    State(relay): State<Relay>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    let event_type = webhook::header(&headers, "x-github-event");
    crate::metrics::webhook_received(if event_type.is_empty() {
        "unknown"
    } else {
        event_type
    });

    webhook::handle_webhook(&relay, &headers, body).await
}

// ── Build callback ──

/// State change envelopes also fire for running builds; only terminal ones
/// start a report, so a build is reported once.
async fn callback_handler(
    State(relay): State<Relay>,
    body: Bytes,
) -> Result<(StatusCode, Json<ReportOutcome>), RelayError> {
    let callback: BuildCallback = decode(&body)?;
    let build_id = callback.build_id()?;

    if let Some(status) = callback
        .announced_status()
        .filter(|status| !status.is_reportable())
    {
        tracing::info!(build_id = %build_id, status = %status, "Build still running, callback skipped");
        let skipped = ReportOutcome::Skipped {
            build_id,
            build_status: status.to_string(),
        };
        return Ok((StatusCode::ACCEPTED, Json(skipped)));
    }

    tracing::info!(build_id = %build_id, "Build callback received");
    reporter::report(&relay, &build_id)
        .await
        .map(|outcome| (StatusCode::OK, Json(outcome)))
}

// ── Rebuild ──

/// The link embedded in failure notifications.
async fn rebuild_link_handler(
    State(relay): State<Relay>,
    Query(request): Query<RebuildRequest>,
) -> Result<(StatusCode, Json<SubmittedBuild>), RelayError> {
    run_rebuild(&relay, request).await
}

async fn rebuild_handler(
    State(relay): State<Relay>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmittedBuild>), RelayError> {
    run_rebuild(&relay, decode(&body)?).await
}

async fn run_rebuild(
    relay: &Relay,
    request: RebuildRequest,
) -> Result<(StatusCode, Json<SubmittedBuild>), RelayError> {
    let build_id = request.build_id()?;
    rebuild::rebuild(relay, request.key.as_deref(), &build_id)
        .await
        .map(|submitted| (StatusCode::CREATED, Json(submitted)))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
