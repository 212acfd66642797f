//! Template copies resident on a storage pool.
//!
//! A template is downloaded onto each pool that needs it. Agents report
//! download progress as heartbeats (`DOWNLOAD_IN_PROGRESS`) before the final
//! `DOWNLOADED` or `DOWNLOAD_ERROR`.

use std::fmt;
use std::time::Duration;

use nimbus_core::{AnswerFields, LifecycleEvent, LifecycleState, ResourceKind, ResourcePayload};
use nimbus_dispatch::DispatchRequest;
use nimbus_fsm::{FsmError, StateMachine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle states of a template copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum TemplateState {
    Allocated,
    Downloading,
    Ready,
    Destroying,
    Destroyed,
    Failed,
}

impl fmt::Display for TemplateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl LifecycleState for TemplateState {
    fn is_transitional(self) -> bool {
        matches!(self, Self::Downloading | Self::Destroying)
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// Events that move a template copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum TemplateEvent {
    DownloadRequested,
    DestroyRequested,
    OperationSucceeded,
    OperationFailed,
    RecoveryRequested,
}

impl fmt::Display for TemplateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl LifecycleEvent for TemplateEvent {}

/// Template copy fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePayload {
    /// Source URL.
    pub url: Option<String>,
    /// Storage pool the copy lives on.
    pub pool: Option<String>,
    /// Virtual size in bytes.
    pub size: Option<u64>,
    /// Bytes used on the pool.
    pub physical_size: Option<u64>,
    /// Checksum reported by the agent.
    pub checksum: Option<String>,
    /// Where the template was installed.
    pub install_path: Option<String>,
    /// Last download percentage.
    pub download_percent: Option<u8>,
    /// Last error.
    pub error: Option<String>,
}

impl ResourcePayload for TemplatePayload {
    fn merge_answer(&mut self, fields: &AnswerFields) {
        if let Some(size) = fields.get("size").and_then(Value::as_u64) {
            self.size = Some(size);
        }
        if let Some(size) = fields.get("physical_size").and_then(Value::as_u64) {
            self.physical_size = Some(size);
        }
        if let Some(checksum) = fields.get("checksum").and_then(Value::as_str) {
            self.checksum = Some(checksum.to_string());
        }
        if let Some(path) = fields.get("install_path").and_then(Value::as_str) {
            self.install_path = Some(path.to_string());
            self.download_percent = Some(100);
        }
    }

    fn record_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    fn record_progress(&mut self, percent: u8) {
        self.download_percent = Some(percent.min(100));
    }
}

/// The template copy resource kind.
#[derive(Debug)]
pub struct TemplateCopy;

impl ResourceKind for TemplateCopy {
    const NAME: &'static str = "template_copy";
    type State = TemplateState;
    type Event = TemplateEvent;
    type Payload = TemplatePayload;

    fn recovery_event(state: TemplateState) -> Option<TemplateEvent> {
        state
            .is_transitional()
            .then_some(TemplateEvent::RecoveryRequested)
    }
}

/// Build the template copy transition table.
///
/// # Errors
///
/// Returns `FsmError::DuplicateTransition` if the table is inconsistent.
pub fn machine() -> Result<StateMachine<TemplateCopy>, FsmError> {
    use TemplateEvent::{
        DestroyRequested, DownloadRequested, OperationFailed, OperationSucceeded,
        RecoveryRequested,
    };
    use TemplateState::{Allocated, Destroyed, Destroying, Downloading, Failed, Ready};

    StateMachine::builder()
        .transition(Allocated, DownloadRequested, Downloading)
        .transition(Failed, DownloadRequested, Downloading)
        .transition(Downloading, OperationSucceeded, Ready)
        .transition(Downloading, OperationFailed, Failed)
        .transition(Downloading, RecoveryRequested, Failed)
        .transition(Allocated, DestroyRequested, Destroyed)
        .transition(Ready, DestroyRequested, Destroying)
        .transition(Failed, DestroyRequested, Destroying)
        .transition(Destroying, OperationSucceeded, Destroyed)
        .transition(Destroying, OperationFailed, Failed)
        .transition(Destroying, RecoveryRequested, Failed)
        .build()
}

/// Download `url` onto `pool`, verifying `checksum` when given.
#[must_use]
pub fn download_request(
    url: &str,
    pool: &str,
    checksum: Option<&str>,
    timeout: Duration,
) -> DispatchRequest<TemplateCopy> {
    let mut params = AnswerFields::new();
    params.insert("url".to_string(), Value::from(url));
    params.insert("pool".to_string(), Value::from(pool));
    if let Some(checksum) = checksum {
        params.insert("checksum".to_string(), Value::from(checksum));
    }
    DispatchRequest {
        command_name: "download_template".to_string(),
        params,
        request_event: TemplateEvent::DownloadRequested,
        on_success: TemplateEvent::OperationSucceeded,
        on_failure: TemplateEvent::OperationFailed,
        timeout,
    }
}

/// Remove the copy from its pool.
#[must_use]
pub fn destroy_request(timeout: Duration) -> DispatchRequest<TemplateCopy> {
    DispatchRequest {
        command_name: "delete_template".to_string(),
        params: AnswerFields::new(),
        request_event: TemplateEvent::DestroyRequested,
        on_success: TemplateEvent::OperationSucceeded,
        on_failure: TemplateEvent::OperationFailed,
        timeout,
    }
}
