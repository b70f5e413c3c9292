//! Relay data model: inbound events, builds, statuses, notifications.

pub mod build;
pub mod event;
pub mod notification;
pub mod status;
