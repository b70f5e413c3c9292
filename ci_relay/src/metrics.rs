//! Prometheus metrics for relay observability.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("ci_relay_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record an event that did not start a build.
pub fn dispatch_skipped(reason: &str) {
    counter!("ci_relay_dispatch_total", "outcome" => "skipped", "reason" => reason.to_string())
        .increment(1);
}

/// Record a submitted build.
pub fn build_submitted() {
    counter!("ci_relay_dispatch_total", "outcome" => "submitted", "reason" => "").increment(1);
}

pub fn poll_attempt() {
    counter!("ci_relay_poll_attempts_total").increment(1);
}

/// Record the public state a build was reported with, or `degraded`.
pub fn build_reported(state: &str) {
    counter!("ci_relay_builds_reported_total", "state" => state.to_string()).increment(1);
}

/// Record how many polls a report needed.
pub fn report_attempts(attempts: usize) {
    histogram!("ci_relay_report_attempts").record(attempts as f64);
}

pub fn chat_notification(result: &str) {
    counter!("ci_relay_chat_notifications_total", "result" => result.to_string()).increment(1);
}

pub fn rebuild_outcome(outcome: &str) {
    counter!("ci_relay_rebuilds_total", "outcome" => outcome.to_string()).increment(1);
}
