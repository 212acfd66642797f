//! Virtual disks.
//!
//! ```text
//!  Allocated ──create──► Creating ──ok──► Ready ──resize──► Resizing ──ok/fail──► Ready
//!      │                    │              │    ──migrate─► Migrating ─ok/fail──► Ready
//!      │                  fail             │ destroy
//!      │                    ▼              ▼
//!      │                  Error ──destroy─► Destroying ──ok──► Destroyed
//!      │                                                           ▲   │
//!      └────────────────────────destroy────────────────────────────┘   │ expunge
//!                                                                      ▼
//!                                                  Expunged ◄──ok── Expunging
//! ```

use std::fmt;
use std::time::Duration;

use nimbus_core::{AnswerFields, LifecycleEvent, LifecycleState, ResourceKind, ResourcePayload};
use nimbus_dispatch::DispatchRequest;
use nimbus_fsm::{FsmError, StateMachine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle states of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeState {
    /// Recorded, nothing on disk yet.
    Allocated,
    /// An agent is creating the backing file.
    Creating,
    /// Usable.
    Ready,
    /// An agent is growing the volume.
    Resizing,
    /// An agent is moving the volume to another pool.
    Migrating,
    /// An agent is deleting the backing file.
    Destroying,
    /// Deleted, record retained.
    Destroyed,
    /// An agent is purging the volume's remains.
    Expunging,
    /// Gone for good.
    Expunged,
    /// Creation or deletion failed.
    Error,
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl LifecycleState for VolumeState {
    fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Resizing | Self::Migrating | Self::Destroying | Self::Expunging
        )
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// Events that move a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum VolumeEvent {
    CreateRequested,
    ResizeRequested,
    MigrateRequested,
    DestroyRequested,
    ExpungeRequested,
    OperationSucceeded,
    OperationFailed,
    RecoveryRequested,
}

impl fmt::Display for VolumeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl LifecycleEvent for VolumeEvent {}

/// Volume fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumePayload {
    /// Provisioned size.
    pub size_gb: Option<u64>,
    /// Storage pool holding the volume.
    pub pool: Option<String>,
    /// Path of the backing file on the pool.
    pub path: Option<String>,
    /// Last error reported for this volume.
    pub error: Option<String>,
    /// Progress of the current operation.
    pub progress: Option<u8>,
}

impl ResourcePayload for VolumePayload {
    fn merge_answer(&mut self, fields: &AnswerFields) {
        if let Some(size) = fields.get("size_gb").and_then(Value::as_u64) {
            self.size_gb = Some(size);
        }
        if let Some(pool) = fields.get("pool").and_then(Value::as_str) {
            self.pool = Some(pool.to_string());
        }
        if let Some(path) = fields.get("path").and_then(Value::as_str) {
            self.path = Some(path.to_string());
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

/// The volume resource kind.
#[derive(Debug)]
pub struct Volume;

impl ResourceKind for Volume {
    const NAME: &'static str = "volume";
    type State = VolumeState;
    type Event = VolumeEvent;
    type Payload = VolumePayload;

    fn recovery_event(state: VolumeState) -> Option<VolumeEvent> {
        state
            .is_transitional()
            .then_some(VolumeEvent::RecoveryRequested)
    }
}

/// Build the volume transition table.
///
/// # Errors
///
/// Returns `FsmError::DuplicateTransition` if the table is inconsistent.
pub fn machine() -> Result<StateMachine<Volume>, FsmError> {
    use VolumeEvent::{
        CreateRequested, DestroyRequested, ExpungeRequested, MigrateRequested, OperationFailed,
        OperationSucceeded, RecoveryRequested, ResizeRequested,
    };
    use VolumeState::{
        Allocated, Creating, Destroyed, Destroying, Error, Expunged, Expunging, Migrating, Ready,
        Resizing,
    };

    StateMachine::builder()
        .transition(Allocated, CreateRequested, Creating)
        .transition(Creating, OperationSucceeded, Ready)
        .transition(Creating, OperationFailed, Error)
        .transition(Creating, RecoveryRequested, Error)
        // A resize needs a known current size to grow from.
        .guarded(Ready, ResizeRequested, Resizing, |record| {
            record.payload.size_gb.is_some()
        })
        .transition(Resizing, OperationSucceeded, Ready)
        .transition(Resizing, OperationFailed, Ready)
        .transition(Resizing, RecoveryRequested, Ready)
        .transition(Ready, MigrateRequested, Migrating)
        .transition(Migrating, OperationSucceeded, Ready)
        .transition(Migrating, OperationFailed, Ready)
        .transition(Migrating, RecoveryRequested, Ready)
        .transition(Allocated, DestroyRequested, Destroyed)
        .transition(Ready, DestroyRequested, Destroying)
        .transition(Error, DestroyRequested, Destroying)
        .transition(Destroying, OperationSucceeded, Destroyed)
        .transition(Destroying, OperationFailed, Error)
        .transition(Destroying, RecoveryRequested, Error)
        .transition(Destroyed, ExpungeRequested, Expunging)
        .transition(Expunging, OperationSucceeded, Expunged)
        .transition(Expunging, OperationFailed, Destroyed)
        .transition(Expunging, RecoveryRequested, Destroyed)
        .build()
}

/// Create the backing file for a volume of `size_gb` on `pool`.
#[must_use]
pub fn create_request(size_gb: u64, pool: &str, timeout: Duration) -> DispatchRequest<Volume> {
    let mut params = AnswerFields::new();
    params.insert("size_gb".to_string(), Value::from(size_gb));
    params.insert("pool".to_string(), Value::from(pool));
    DispatchRequest {
        command_name: "create_volume".to_string(),
        params,
        request_event: VolumeEvent::CreateRequested,
        on_success: VolumeEvent::OperationSucceeded,
        on_failure: VolumeEvent::OperationFailed,
        timeout,
    }
}

/// Grow a volume to `size_gb`.
#[must_use]
pub fn resize_request(size_gb: u64, timeout: Duration) -> DispatchRequest<Volume> {
    let mut params = AnswerFields::new();
    params.insert("size_gb".to_string(), Value::from(size_gb));
    DispatchRequest {
        command_name: "resize_volume".to_string(),
        params,
        request_event: VolumeEvent::ResizeRequested,
        on_success: VolumeEvent::OperationSucceeded,
        on_failure: VolumeEvent::OperationFailed,
        timeout,
    }
}

/// Move a volume to `target_pool`.
#[must_use]
pub fn migrate_request(target_pool: &str, timeout: Duration) -> DispatchRequest<Volume> {
    let mut params = AnswerFields::new();
    params.insert("target_pool".to_string(), Value::from(target_pool));
    DispatchRequest {
        command_name: "migrate_volume".to_string(),
        params,
        request_event: VolumeEvent::MigrateRequested,
        on_success: VolumeEvent::OperationSucceeded,
        on_failure: VolumeEvent::OperationFailed,
        timeout,
    }
}

/// Delete a volume's backing file.
#[must_use]
pub fn destroy_request(timeout: Duration) -> DispatchRequest<Volume> {
    DispatchRequest {
        command_name: "destroy_volume".to_string(),
        params: AnswerFields::new(),
        request_event: VolumeEvent::DestroyRequested,
        on_success: VolumeEvent::OperationSucceeded,
        on_failure: VolumeEvent::OperationFailed,
        timeout,
    }
}
