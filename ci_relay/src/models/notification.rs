//! Chat attachment sent when a build fails.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureNotification {
    pub title: String,
    pub color: String,
    pub fields: Vec<NotificationField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationField {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<bool>,
}

impl NotificationField {
    pub fn titled(title: &str, value: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            value: value.to_string(),
            short: None,
        }
    }

    pub fn short(title: &str, value: &str) -> Self {
        Self {
            short: Some(true),
            ..Self::titled(title, value)
        }
    }

    pub fn untitled(value: String) -> Self {
        Self {
            title: None,
            value,
            short: None,
        }
    }
}

/// Where a failure notification goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    /// Direct message to the committer's chat handle.
    Direct(String),
    /// The configured team channel, or the webhook's default when unset.
    Channel(Option<String>),
}

impl ChatTarget {
    pub fn channel(&self) -> Option<String> {
        match self {
            Self::Direct(handle) => Some(format!("@{handle}")),
            Self::Channel(channel) => channel.clone(),
        }
    }
}
