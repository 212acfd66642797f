//! Shared filesystems served by a provider VM.
//!
//! ```text
//!  Allocated ──deploy──► Deploying ──ok──► Ready ──stop──► Stopping ──ok──► Stopped
//!      │                     │             ▲  ▲               │             │   │
//!      │                   fail            │  └─────fail──────┘           start │
//!      │                     ▼             │ ok                             │   │
//!      │                   Error ──start─► Starting ◄─────────────────────────┘   │
//!      │                     │                                                   │
//!      └──destroy──────────► Destroyed ◄─────────────destroy─────────────────────┘
//!                               │ expunge
//!                               ▼
//!                           Expunging ──ok──► Expunged
//! ```
//!
//! A failed start leaves the filesystem `Stopped` with the error recorded.

use std::fmt;
use std::time::Duration;

use nimbus_core::{AnswerFields, LifecycleEvent, LifecycleState, ResourceKind, ResourcePayload};
use nimbus_dispatch::DispatchRequest;
use nimbus_fsm::{FsmError, StateMachine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle states of a shared filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum SharedFsState {
    Allocated,
    Deploying,
    Ready,
    Stopping,
    Stopped,
    Starting,
    Destroyed,
    Expunging,
    Expunged,
    Error,
}

impl fmt::Display for SharedFsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl LifecycleState for SharedFsState {
    fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::Deploying | Self::Stopping | Self::Starting | Self::Expunging
        )
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// Events that move a shared filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum SharedFsEvent {
    DeployRequested,
    StartRequested,
    StopRequested,
    DestroyRequested,
    ExpungeRequested,
    OperationSucceeded,
    OperationFailed,
    RecoveryRequested,
}

impl fmt::Display for SharedFsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl LifecycleEvent for SharedFsEvent {}

/// Shared filesystem fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFsPayload {
    /// Backing volume.
    pub volume_id: Option<u64>,
    /// Provider VM serving the export.
    pub provider_vm: Option<String>,
    /// Export address clients mount.
    pub endpoint: Option<String>,
    /// Last error.
    pub error: Option<String>,
    /// Progress of the current operation.
    pub progress: Option<u8>,
}

impl ResourcePayload for SharedFsPayload {
    fn merge_answer(&mut self, fields: &AnswerFields) {
        if let Some(volume_id) = fields.get("volume_id").and_then(Value::as_u64) {
            self.volume_id = Some(volume_id);
        }
        if let Some(vm) = fields.get("provider_vm").and_then(Value::as_str) {
            self.provider_vm = Some(vm.to_string());
        }
        if let Some(endpoint) = fields.get("endpoint").and_then(Value::as_str) {
            self.endpoint = Some(endpoint.to_string());
        }
        self.progress = None;
    }

    fn record_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    fn record_progress(&mut self, percent: u8) {
        self.progress = Some(percent.min(100));
    }
}

/// The shared filesystem resource kind.
#[derive(Debug)]
pub struct SharedFs;

impl ResourceKind for SharedFs {
    const NAME: &'static str = "shared_fs";
    type State = SharedFsState;
    type Event = SharedFsEvent;
    type Payload = SharedFsPayload;

    fn recovery_event(state: SharedFsState) -> Option<SharedFsEvent> {
        state
            .is_transitional()
            .then_some(SharedFsEvent::RecoveryRequested)
    }
}

/// Build the shared filesystem transition table.
///
/// # Errors
///
/// Returns `FsmError::DuplicateTransition` if the table is inconsistent.
pub fn machine() -> Result<StateMachine<SharedFs>, FsmError> {
    use SharedFsEvent::{
        DeployRequested, DestroyRequested, ExpungeRequested, OperationFailed, OperationSucceeded,
        RecoveryRequested, StartRequested, StopRequested,
    };
    use SharedFsState::{
        Allocated, Deploying, Destroyed, Error, Expunged, Expunging, Ready, Starting, Stopped,
        Stopping,
    };

    StateMachine::builder()
        .transition(Allocated, DeployRequested, Deploying)
        .transition(Deploying, OperationSucceeded, Ready)
        .transition(Deploying, OperationFailed, Error)
        .transition(Deploying, RecoveryRequested, Error)
        .transition(Ready, StopRequested, Stopping)
        .transition(Stopping, OperationSucceeded, Stopped)
        .transition(Stopping, OperationFailed, Ready)
        .transition(Stopping, RecoveryRequested, Error)
        .transition(Stopped, StartRequested, Starting)
        .transition(Error, StartRequested, Starting)
        .transition(Starting, OperationSucceeded, Ready)
        .transition(Starting, OperationFailed, Stopped)
        .transition(Starting, RecoveryRequested, Stopped)
        .transition(Allocated, DestroyRequested, Destroyed)
        .transition(Stopped, DestroyRequested, Destroyed)
        .transition(Error, DestroyRequested, Destroyed)
        .transition(Destroyed, ExpungeRequested, Expunging)
        .transition(Expunging, OperationSucceeded, Expunged)
        .transition(Expunging, OperationFailed, Destroyed)
        .transition(Expunging, RecoveryRequested, Destroyed)
        .build()
}

fn request(
    command: &str,
    params: AnswerFields,
    request_event: SharedFsEvent,
    timeout: Duration,
) -> DispatchRequest<SharedFs> {
    DispatchRequest {
        command_name: command.to_string(),
        params,
        request_event,
        on_success: SharedFsEvent::OperationSucceeded,
        on_failure: SharedFsEvent::OperationFailed,
        timeout,
    }
}

/// Deploy the provider VM for a filesystem on `volume_id`.
#[must_use]
pub fn deploy_request(volume_id: u64, timeout: Duration) -> DispatchRequest<SharedFs> {
    let mut params = AnswerFields::new();
    params.insert("volume_id".to_string(), Value::from(volume_id));
    request("deploy_shared_fs", params, SharedFsEvent::DeployRequested, timeout)
}

/// Start a stopped filesystem.
#[must_use]
pub fn start_request(timeout: Duration) -> DispatchRequest<SharedFs> {
    request("start_shared_fs", AnswerFields::new(), SharedFsEvent::StartRequested, timeout)
}

/// Stop a running filesystem.
#[must_use]
pub fn stop_request(timeout: Duration) -> DispatchRequest<SharedFs> {
    request("stop_shared_fs", AnswerFields::new(), SharedFsEvent::StopRequested, timeout)
}

/// Purge a destroyed filesystem's provider VM and export.
#[must_use]
pub fn expunge_request(timeout: Duration) -> DispatchRequest<SharedFs> {
    request("expunge_shared_fs", AnswerFields::new(), SharedFsEvent::ExpungeRequested, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_edges() {
        let machine = machine().unwrap();
        assert_eq!(
            machine.next_state(SharedFsState::Stopped, SharedFsEvent::StartRequested),
            Some(SharedFsState::Starting)
        );
        assert_eq!(
            machine.next_state(SharedFsState::Starting, SharedFsEvent::OperationSucceeded),
            Some(SharedFsState::Ready)
        );
        assert_eq!(
            machine.next_state(SharedFsState::Starting, SharedFsEvent::OperationFailed),
            Some(SharedFsState::Stopped)
        );
        assert_eq!(
            machine.next_state(SharedFsState::Starting, SharedFsEvent::StartRequested),
            None
        );
    }

    #[test]
    fn operation_succeeded_is_not_legal_from_allocated() {
        let machine = machine().unwrap();
        assert_eq!(
            machine.next_state(SharedFsState::Allocated, SharedFsEvent::OperationSucceeded),
            None
        );
    }

    #[test]
    fn every_transitional_state_can_be_recovered() {
        let machine = machine().unwrap();
        for state in machine.states().into_iter().filter(|s| s.is_transitional()) {
            let event = SharedFs::recovery_event(state).unwrap();
            let to = machine.next_state(state, event).unwrap();
            assert!(to.is_stable(), "{state} recovers into {to}");
        }
    }

    #[test]
    fn ready_filesystem_cannot_be_destroyed() {
        let machine = machine().unwrap();
        assert_eq!(
            machine.next_state(SharedFsState::Ready, SharedFsEvent::DestroyRequested),
            None
        );
    }

    #[test]
    fn answer_fields_are_merged() {
        let mut payload = SharedFsPayload::default();
        payload.record_progress(250);
        assert_eq!(payload.progress, Some(100));

        let mut fields = AnswerFields::new();
        fields.insert("provider_vm".to_string(), serde_json::json!("fs-vm-12"));
        fields.insert("endpoint".to_string(), serde_json::json!("10.0.4.7:/export"));
        payload.merge_answer(&fields);

        assert_eq!(payload.provider_vm.as_deref(), Some("fs-vm-12"));
        assert_eq!(payload.endpoint.as_deref(), Some("10.0.4.7:/export"));
        assert_eq!(payload.progress, None);
    }
}
