//! Centrix CI relay.
//!
//! Turns source-control webhooks into CodeBuild builds, relays build
//! outcomes back as commit statuses, notifies Slack about failures, and
//! resubmits failed builds on request.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod services;
