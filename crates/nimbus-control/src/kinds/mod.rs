//! The resource kinds managed by the control plane.
//!
//! Each module defines a kind's states, events and payload, its transition
//! table and helpers that build the commands it sends to agents.

pub mod shared_fs;
pub mod template;
pub mod volume;

pub use shared_fs::{SharedFs, SharedFsEvent, SharedFsPayload, SharedFsState};
pub use template::{TemplateCopy, TemplateEvent, TemplatePayload, TemplateState};
pub use volume::{Volume, VolumeEvent, VolumePayload, VolumeState};
