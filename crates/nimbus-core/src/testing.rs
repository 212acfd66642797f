//! A small resource kind for exercising generic components in tests.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::{AnswerFields, LifecycleEvent, LifecycleState, ResourceKind, ResourcePayload};

/// States of the test disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum DiskState {
    Allocated,
    Creating,
    Ready,
    Resizing,
    Destroyed,
    Error,
}

impl fmt::Display for DiskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl LifecycleState for DiskState {
    fn is_transitional(self) -> bool {
        matches!(self, Self::Creating | Self::Resizing)
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// Events of the test disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum DiskEvent {
    CreateRequested,
    ResizeRequested,
    DestroyRequested,
    OperationSucceeded,
    OperationFailed,
    RecoveryRequested,
}

impl fmt::Display for DiskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl LifecycleEvent for DiskEvent {}

/// Payload of the test disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskPayload {
    /// Size reported by the agent.
    pub size_gb: Option<u64>,
    /// Install path reported by the agent.
    pub path: Option<String>,
    /// Last error.
    pub error: Option<String>,
    /// Last reported progress.
    pub progress: Option<u8>,
}

impl ResourcePayload for DiskPayload {
    fn merge_answer(&mut self, fields: &AnswerFields) {
        if let Some(size) = fields.get("size_gb").and_then(serde_json::Value::as_u64) {
            self.size_gb = Some(size);
        }
        if let Some(path) = fields.get("path").and_then(serde_json::Value::as_str) {
            self.path = Some(path.to_string());
        }
    }

    fn record_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    fn record_progress(&mut self, percent: u8) {
        self.progress = Some(percent);
    }
}

/// The test disk kind.
#[derive(Debug)]
pub struct Disk;

impl ResourceKind for Disk {
    const NAME: &'static str = "disk";
    type State = DiskState;
    type Event = DiskEvent;
    type Payload = DiskPayload;

    fn recovery_event(state: DiskState) -> Option<DiskEvent> {
        state
            .is_transitional()
            .then_some(DiskEvent::RecoveryRequested)
    }
}
