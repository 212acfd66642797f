//! Transition table for the test disk kind.

use nimbus_core::testing::{Disk, DiskEvent, DiskState};

use crate::machine::StateMachine;

/// Build the test disk table.
///
/// ```text
/// Allocated --CreateRequested--> Creating --OperationSucceeded--> Ready
///                                Creating --OperationFailed-----> Error
/// Ready --ResizeRequested--> Resizing --OperationSucceeded/Failed--> Ready
/// Creating|Resizing --RecoveryRequested--> Error
/// Ready|Error --DestroyRequested--> Destroyed
/// ```
///
/// # Panics
///
/// Never: the table has no duplicate pairs.
#[must_use]
pub fn disk_machine() -> StateMachine<Disk> {
    use DiskEvent::{
        CreateRequested, DestroyRequested, OperationFailed, OperationSucceeded, RecoveryRequested,
        ResizeRequested,
    };
    use DiskState::{Allocated, Creating, Destroyed, Error, Ready, Resizing};

    StateMachine::builder()
        .transition(Allocated, CreateRequested, Creating)
        .transition(Creating, OperationSucceeded, Ready)
        .transition(Creating, OperationFailed, Error)
        .transition(Creating, RecoveryRequested, Error)
        .transition(Ready, ResizeRequested, Resizing)
        .transition(Resizing, OperationSucceeded, Ready)
        .transition(Resizing, OperationFailed, Ready)
        .transition(Resizing, RecoveryRequested, Error)
        .transition(Ready, DestroyRequested, Destroyed)
        .transition(Error, DestroyRequested, Destroyed)
        .build()
        .expect("disk table has unique transitions")
}
