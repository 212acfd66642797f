//! Operator alerts for failed commands.

use nimbus_core::{CorrelationId, ResourceId};

/// A failed or timed-out command worth an operator's attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Resource kind name.
    pub kind: &'static str,
    /// Affected resource.
    pub resource_id: ResourceId,
    /// Command that failed.
    pub correlation_id: CorrelationId,
    /// Command name.
    pub command: String,
    /// What went wrong.
    pub message: String,
}

/// Receives alerts. Fire-and-forget: implementations must not block.
pub trait AlertSink: Send + Sync {
    /// Raise an alert.
    fn alert(&self, alert: Alert);
}

/// Logs alerts at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, alert: Alert) {
        tracing::warn!(
            kind = alert.kind,
            resource_id = %alert.resource_id,
            correlation_id = %alert.correlation_id,
            command = %alert.command,
            message = %alert.message,
            "Command failed"
        );
    }
}
