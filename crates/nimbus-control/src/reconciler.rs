//! Recovery sweep for resources stuck in a transitional state.
//!
//! A resource should only sit in a transitional state while a command is
//! outstanding for it. After a restart (pending commands live in memory) or
//! a lost timeout, nothing will ever resolve it. The sweep finds such
//! resources and moves them through their kind's recovery event.
//!
//! The moves are committed together under `lock_rows`; the state changes
//! are published only after the unit of work has closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nimbus_core::{LifecycleState, Record, ResourceKind, ResourcePayload, StateChange};
use nimbus_dispatch::AgentTransport;
use nimbus_store::{RowUpdate, VersionedStore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{ControlError, Result};
use crate::kinds::{SharedFs, TemplateCopy, Volume};
use crate::service::{ControlPlane, ResourceService};

/// Recover every resource of `service`'s kind that has been in a
/// transitional state since before `now - stuck_after` and has no command
/// outstanding.
///
/// Returns the state changes that were committed and published.
///
/// # Errors
///
/// Returns `ControlError::Store` if listing or committing fails.
pub fn sweep<K, S, T>(
    service: &ResourceService<K, S, T>,
    stuck_after: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<StateChange>>
where
    K: ResourceKind,
    S: VersionedStore<K> + 'static,
    T: AgentTransport + 'static,
{
    let engine = service.engine();
    let machine = engine.machine();
    let cutoff = now
        - chrono::Duration::from_std(stuck_after)
            .map_err(|e| ControlError::Internal(format!("stuck threshold out of range: {e}")))?;

    let mut candidates = Vec::new();
    for state in machine.states() {
        if !state.is_transitional() {
            continue;
        }
        let Some(event) = K::recovery_event(state) else {
            continue;
        };
        if machine.next_state(state, event).is_none() {
            warn!(kind = K::NAME, %state, %event, "No recovery edge for transitional state");
            continue;
        }
        candidates.extend(
            engine
                .store()
                .list_by_state(state)?
                .into_iter()
                .filter(|record| record.updated_at <= cutoff && !service.has_pending(record.id))
                .map(|record| record.id),
        );
    }

    if candidates.is_empty() {
        debug!(kind = K::NAME, "Nothing to recover");
        return Ok(Vec::new());
    }

    // Re-checked under the row locks: a record touched since it was listed
    // is no longer stuck.
    let mut moves = HashMap::new();
    let committed = engine.store().lock_rows(&candidates, &mut |records: &[Record<K>]| {
        records
            .iter()
            .filter(|record| record.updated_at <= cutoff && record.state.is_transitional())
            .filter_map(|record| {
                let event = K::recovery_event(record.state)?;
                let to = machine
                    .transition(record.state, event)
                    .filter(|edge| edge.permits(record))?
                    .to;
                let mut payload = record.payload.clone();
                payload.record_error(Some(format!(
                    "recovered: stuck in {} since {}",
                    record.state,
                    record.updated_at.to_rfc3339()
                )));
                moves.insert(record.id, (record.state, event));
                Some(RowUpdate {
                    id: record.id,
                    new_state: to,
                    payload,
                })
            })
            .collect()
    })?;

    let changes: Vec<StateChange> = committed
        .iter()
        .filter_map(|record| {
            let (from, event) = moves.get(&record.id)?;
            Some(StateChange::new(*from, *event, record))
        })
        .collect();

    for change in &changes {
        warn!(
            kind = K::NAME,
            resource_id = %change.resource_id,
            from = %change.from,
            to = %change.to,
            version = change.version,
            "Recovered stuck resource"
        );
        engine.publish_change(change);
    }
    Ok(changes)
}

/// Runs [`ControlPlane::reconcile`] on a fixed interval.
pub struct Reconciler<S, T> {
    plane: Arc<ControlPlane<S, T>>,
    interval: Duration,
    stuck_after: Duration,
}

impl<S, T> Reconciler<S, T>
where
    S: VersionedStore<Volume> + VersionedStore<SharedFs> + VersionedStore<TemplateCopy> + 'static,
    T: AgentTransport + 'static,
{
    /// Create a reconciler using the plane's configured interval and threshold.
    #[must_use]
    pub fn new(plane: Arc<ControlPlane<S, T>>) -> Self {
        let interval = plane.config().reconcile_interval();
        let stuck_after = plane.config().stuck_after();
        Self {
            plane,
            interval,
            stuck_after,
        }
    }

    /// Sweep forever. Failures are logged and retried on the next tick.
    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            stuck_after_secs = self.stuck_after.as_secs(),
            "Starting recovery sweep loop"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.plane.reconcile(self.stuck_after) {
                Ok(0) => debug!("Recovery sweep found nothing stuck"),
                Ok(recovered) => info!(recovered, "Recovery sweep complete"),
                Err(e) => error!(error = %e, "Recovery sweep failed, will retry"),
            }
        }
    }
}
