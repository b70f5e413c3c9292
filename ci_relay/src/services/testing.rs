//! In-memory collaborators for service tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::models::build::{BuildId, BuildRecord, BuildRequest, BuildStatus};
use crate::models::notification::FailureNotification;
use crate::models::status::{StatusReceipt, StatusUpdate};
use crate::services::build_service::BuildService;
use crate::services::github_service::StatusReporter;
use crate::services::retry::RetryPolicy;
use crate::services::slack_service::ChatNotifier;
use crate::services::Relay;

/// One scripted answer to `fetch`.
#[derive(Clone)]
pub enum FetchStep {
    Record(BuildRecord),
    Fail(String),
}

/// Build service that records submissions and replays scripted fetches.
///
/// The last scripted step repeats once the script runs out.
#[derive(Default)]
pub struct FakeBuildService {
    script: Mutex<Vec<FetchStep>>,
    pub fetches: AtomicUsize,
    pub submitted: Mutex<Vec<(BuildRequest, Option<String>)>>,
    pub fail_submit: bool,
}

impl FakeBuildService {
    pub fn with_script(script: Vec<FetchStep>) -> Self {
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    /// Refuses every submission.
    pub fn failing_submit() -> Self {
        Self {
            fail_submit: true,
            ..Self::default()
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<(BuildRequest, Option<String>)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildService for FakeBuildService {
    async fn submit(
        &self,
        request: &BuildRequest,
        image_override: Option<&str>,
    ) -> Result<BuildId, RelayError> {
        if self.fail_submit {
            return Err(RelayError::BuildService("submission refused".into()));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push((request.clone(), image_override.map(str::to_string)));
        Ok(BuildId::new(format!("app:{}", submitted.len())))
    }

    async fn fetch(&self, id: &BuildId) -> Result<BuildRecord, RelayError> {
        let call = self.fetches.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap();
        let step = script
            .get(call)
            .or(script.last())
            .cloned()
            .ok_or_else(|| RelayError::BuildNotFound(id.to_string()))?;
        match step {
            FetchStep::Record(record) => Ok(record),
            FetchStep::Fail(message) => Err(RelayError::BuildService(message)),
        }
    }
}

#[derive(Default)]
pub struct RecordingStatus {
    pub updates: Mutex<Vec<StatusUpdate>>,
    pub fail: bool,
}

impl RecordingStatus {
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusReporter for RecordingStatus {
    async fn update(&self, update: &StatusUpdate) -> Result<StatusReceipt, RelayError> {
        self.updates.lock().unwrap().push(update.clone());
        if self.fail {
            return Err(RelayError::Status("GitHub returned 500".into()));
        }
        Ok(StatusReceipt::Posted { http_status: 201 })
    }
}

pub struct RecordingChat {
    pub enabled: bool,
    pub fail: bool,
    pub sent: Mutex<Vec<(Option<String>, FailureNotification)>>,
}

impl Default for RecordingChat {
    fn default() -> Self {
        Self {
            enabled: true,
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingChat {
    pub fn sent(&self) -> Vec<(Option<String>, FailureNotification)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatNotifier for RecordingChat {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(
        &self,
        channel: Option<&str>,
        notification: &FailureNotification,
    ) -> Result<(), RelayError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel.map(str::to_string), notification.clone()));
        if self.fail {
            return Err(RelayError::Chat("Slack returned 500".into()));
        }
        Ok(())
    }
}

pub struct Harness {
    pub relay: Relay,
    pub builds: Arc<FakeBuildService>,
    pub statuses: Arc<RecordingStatus>,
    pub chat: Arc<RecordingChat>,
}

impl Harness {
    pub fn new(config: RelayConfig, builds: FakeBuildService) -> Self {
        Self::with(config, builds, RecordingStatus::default(), RecordingChat::default())
    }

    pub fn with(
        mut config: RelayConfig,
        builds: FakeBuildService,
        statuses: RecordingStatus,
        chat: RecordingChat,
    ) -> Self {
        if config.poll == RetryPolicy::default() {
            config.poll = fast_poll(5);
        }
        let builds = Arc::new(builds);
        let statuses = Arc::new(statuses);
        let chat = Arc::new(chat);
        let relay = Relay::new(
            Arc::new(config),
            builds.clone(),
            statuses.clone(),
            chat.clone(),
        );
        Self {
            relay,
            builds,
            statuses,
            chat,
        }
    }
}

pub fn fast_poll(max_attempts: usize) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        deadline: Duration::from_secs(5),
    }
}

pub fn record(id: &str, status: &str, vars: &[(&str, &str)]) -> BuildRecord {
    BuildRecord {
        id: BuildId::new(id),
        source_version: "abc123".to_string(),
        build_status: BuildStatus::from_code(status),
        environment_variables: vars.iter().copied().collect(),
    }
}

/// Value of the notification field with the given title.
pub fn field<'a>(notification: &'a FailureNotification, title: &str) -> Option<&'a str> {
    notification
        .fields
        .iter()
        .find(|f| f.title.as_deref() == Some(title))
        .map(|f| f.value.as_str())
}
