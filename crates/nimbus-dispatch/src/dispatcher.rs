//! The command dispatcher.
//!
//! `dispatch` moves the resource into its transitional state, registers a
//! pending command and returns immediately. The command is then resolved
//! exactly once by whichever comes first:
//!
//! - an answer (in-line from the transport or delivered via [`Dispatcher::on_answer`])
//! - the timeout
//! - a selection or transport failure
//!
//! Resolution removes the pending entry under the table lock, so a second
//! resolver finds nothing and backs off. Heartbeats update progress without
//! resolving.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nimbus_core::{
    AnswerFields, CorrelationId, Record, ResourceId, ResourceKind, ResourcePayload,
};
use nimbus_fsm::{Engine, EngineError};
use nimbus_store::VersionedStore;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertSink};
use crate::error::{DispatchError, Result};
use crate::message::{Answer, Command};
use crate::selector::AgentSelector;
use crate::transport::AgentTransport;

/// Error text recorded when a command times out.
pub const TIMEOUT_ERROR: &str = "timeout";

/// What to send and which events to raise around it.
pub struct DispatchRequest<K: ResourceKind> {
    /// Command name, e.g. `download_template`.
    pub command_name: String,
    /// Command parameters.
    pub params: AnswerFields,
    /// Event that moves the resource into its transitional state.
    pub request_event: K::Event,
    /// Event raised on a successful answer.
    pub on_success: K::Event,
    /// Event raised on failure or timeout.
    pub on_failure: K::Event,
    /// How long to wait for a final answer.
    pub timeout: Duration,
}

impl<K: ResourceKind> fmt::Debug for DispatchRequest<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRequest")
            .field("command_name", &self.command_name)
            .field("request_event", &self.request_event)
            .field("on_success", &self.on_success)
            .field("on_failure", &self.on_failure)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// How a dispatched command ended.
pub enum CommandOutcome<K: ResourceKind> {
    /// The agent reported success; the success event was applied.
    Succeeded(Record<K>),
    /// The agent (or the transport) reported failure; the failure event was applied.
    Failed {
        /// Record after the failure event.
        record: Record<K>,
        /// Recorded error text.
        error: String,
    },
    /// No final answer arrived in time; the failure event was applied.
    TimedOut(Record<K>),
}

impl<K: ResourceKind> CommandOutcome<K> {
    /// The record as committed by the final transition.
    #[must_use]
    pub const fn record(&self) -> &Record<K> {
        match self {
            Self::Succeeded(record) | Self::Failed { record, .. } | Self::TimedOut(record) => {
                record
            }
        }
    }

    /// Whether the command succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

impl<K: ResourceKind> fmt::Debug for CommandOutcome<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(record) => f.debug_tuple("Succeeded").field(record).finish(),
            Self::Failed { record, error } => f
                .debug_struct("Failed")
                .field("record", record)
                .field("error", error)
                .finish(),
            Self::TimedOut(record) => f.debug_tuple("TimedOut").field(record).finish(),
        }
    }
}

/// What [`Dispatcher::on_answer`] did with an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// The answer resolved its command.
    Applied,
    /// The answer was a heartbeat; progress was recorded.
    Progress,
    /// Unknown, duplicate or late: nothing pending matched.
    Discarded,
}

type Completion<K> = std::result::Result<CommandOutcome<K>, EngineError>;

/// Returned by [`Dispatcher::dispatch`] as soon as the command is registered.
pub struct DispatchHandle<K: ResourceKind> {
    /// Correlation id of the command.
    pub correlation_id: CorrelationId,
    /// Record after the request transition.
    pub record: Record<K>,
    completion: oneshot::Receiver<Completion<K>>,
}

impl<K: ResourceKind> DispatchHandle<K> {
    /// Wait for the command to be resolved.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Engine` if the final transition failed and
    /// `DispatchError::CompletionDropped` if the dispatcher went away.
    pub async fn wait(self) -> Result<CommandOutcome<K>> {
        match self.completion.await {
            Ok(result) => result.map_err(DispatchError::from),
            Err(_) => Err(DispatchError::CompletionDropped),
        }
    }
}

impl<K: ResourceKind> fmt::Debug for DispatchHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("correlation_id", &self.correlation_id)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

struct PendingCommand<K: ResourceKind> {
    correlation_id: CorrelationId,
    resource_id: ResourceId,
    command: String,
    on_success: K::Event,
    on_failure: K::Event,
    dispatched_at: Instant,
    timeout_task: Option<AbortHandle>,
    completion: oneshot::Sender<Completion<K>>,
}

struct Inner<K: ResourceKind, S, T> {
    engine: Engine<K, S>,
    selector: Arc<dyn AgentSelector>,
    transport: Arc<T>,
    alerts: Arc<dyn AlertSink>,
    pending: Mutex<HashMap<CorrelationId, PendingCommand<K>>>,
}

/// Ships commands for one resource kind and applies their answers.
pub struct Dispatcher<K: ResourceKind, S, T> {
    inner: Arc<Inner<K, S, T>>,
}

impl<K: ResourceKind, S, T> Clone for Dispatcher<K, S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, S, T> Dispatcher<K, S, T>
where
    K: ResourceKind,
    S: VersionedStore<K> + 'static,
    T: AgentTransport + 'static,
{
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        engine: Engine<K, S>,
        selector: Arc<dyn AgentSelector>,
        transport: Arc<T>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                selector,
                transport,
                alerts,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The engine used for transitions.
    #[must_use]
    pub fn engine(&self) -> &Engine<K, S> {
        &self.inner.engine
    }

    /// Move `record` into its transitional state and send the command.
    ///
    /// Returns as soon as the command is registered; the outcome arrives
    /// through [`DispatchHandle::wait`]. Must be called from within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Engine` if the request transition fails, in
    /// which case nothing is sent.
    pub fn dispatch(
        &self,
        record: &Record<K>,
        request: DispatchRequest<K>,
    ) -> Result<DispatchHandle<K>> {
        let record = self
            .inner
            .engine
            .transition(record, request.request_event, &|p| p.record_error(None))?;

        let correlation_id = CorrelationId::generate();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(
            correlation_id,
            PendingCommand {
                correlation_id,
                resource_id: record.id,
                command: request.command_name.clone(),
                on_success: request.on_success,
                on_failure: request.on_failure,
                dispatched_at: Instant::now(),
                timeout_task: None,
                completion: tx,
            },
        );

        let timeout_task = {
            let inner = Arc::clone(&self.inner);
            let timeout = request.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                inner.expire(correlation_id);
            })
        };
        if let Some(pending) = self.inner.pending.lock().get_mut(&correlation_id) {
            pending.timeout_task = Some(timeout_task.abort_handle());
        }

        info!(
            kind = K::NAME,
            resource_id = %record.id,
            %correlation_id,
            command = %request.command_name,
            timeout_secs = request.timeout.as_secs(),
            "Dispatching command"
        );

        let command = Command {
            correlation_id,
            resource_kind: K::NAME.to_string(),
            resource_id: record.id,
            name: request.command_name,
            params: request.params,
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.deliver(command).await });

        Ok(DispatchHandle {
            correlation_id,
            record,
            completion: rx,
        })
    }

    /// Apply an answer delivered out of band.
    pub fn on_answer(&self, answer: Answer) -> AnswerOutcome {
        self.inner.on_answer(answer)
    }

    /// Whether a command is outstanding for resource `id`.
    #[must_use]
    pub fn has_pending(&self, id: ResourceId) -> bool {
        self.inner
            .pending
            .lock()
            .values()
            .any(|p| p.resource_id == id)
    }

    /// Whether `correlation_id` belongs to an outstanding command.
    #[must_use]
    pub fn is_pending(&self, correlation_id: CorrelationId) -> bool {
        self.inner.pending.lock().contains_key(&correlation_id)
    }

    /// Number of outstanding commands.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl<K, S, T> Inner<K, S, T>
where
    K: ResourceKind,
    S: VersionedStore<K>,
    T: AgentTransport,
{
    async fn deliver(&self, command: Command) {
        let correlation_id = command.correlation_id;
        let endpoint = match self.selector.select(K::NAME, command.resource_id) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(%correlation_id, error = %e, "Agent selection failed");
                self.fail(correlation_id, e.to_string());
                return;
            }
        };

        match self.transport.send(&endpoint, &command).await {
            Ok(Some(answer)) => {
                self.on_answer(answer);
            }
            Ok(None) => {
                debug!(%correlation_id, %endpoint, "Command sent, awaiting answer");
            }
            Err(e) => {
                error!(%correlation_id, %endpoint, error = %e, "Failed to send command");
                self.fail(correlation_id, e.to_string());
            }
        }
    }

    fn on_answer(&self, answer: Answer) -> AnswerOutcome {
        let correlation_id = answer.correlation_id;

        if answer.is_heartbeat() {
            let resource_id = self
                .pending
                .lock()
                .get(&correlation_id)
                .map(|p| p.resource_id);
            let Some(id) = resource_id else {
                debug!(%correlation_id, "Discarding heartbeat for unknown command");
                return AnswerOutcome::Discarded;
            };
            let Some(percent) = answer.progress else {
                debug!(kind = K::NAME, resource_id = %id, "Heartbeat without progress");
                return AnswerOutcome::Progress;
            };
            match self
                .engine
                .store()
                .update_payload(id, &|p| p.record_progress(percent))
            {
                Ok(_) => debug!(kind = K::NAME, resource_id = %id, percent, "Command progress"),
                Err(e) => warn!(kind = K::NAME, resource_id = %id, error = %e, "Failed to record progress"),
            }
            return AnswerOutcome::Progress;
        }

        let Some(pending) = self.take(correlation_id) else {
            debug!(%correlation_id, "Discarding duplicate or late answer");
            return AnswerOutcome::Discarded;
        };
        if let Some(task) = &pending.timeout_task {
            task.abort();
        }

        if answer.is_success() {
            let result = self
                .finish(&pending, pending.on_success, &|p| {
                    p.merge_answer(&answer.fields);
                    p.record_error(None);
                })
                .map(CommandOutcome::Succeeded);
            self.resolve(pending, result);
        } else {
            self.fail_pending(pending, answer.error_message(), false);
        }
        AnswerOutcome::Applied
    }

    fn fail(&self, correlation_id: CorrelationId, error: String) {
        if let Some(pending) = self.take(correlation_id) {
            if let Some(task) = &pending.timeout_task {
                task.abort();
            }
            self.fail_pending(pending, error, false);
        }
    }

    fn expire(&self, correlation_id: CorrelationId) {
        if let Some(pending) = self.take(correlation_id) {
            warn!(
                kind = K::NAME,
                resource_id = %pending.resource_id,
                %correlation_id,
                command = %pending.command,
                "Command timed out"
            );
            self.fail_pending(pending, TIMEOUT_ERROR.to_string(), true);
        }
    }

    fn fail_pending(&self, pending: PendingCommand<K>, error: String, timed_out: bool) {
        self.alerts.alert(Alert {
            kind: K::NAME,
            resource_id: pending.resource_id,
            correlation_id: pending.correlation_id,
            command: pending.command.clone(),
            message: error.clone(),
        });

        let committed = self.finish(&pending, pending.on_failure, &|p| {
            p.record_error(Some(error.clone()));
        });
        let result = committed.map(|record| {
            if timed_out {
                CommandOutcome::TimedOut(record)
            } else {
                CommandOutcome::Failed { record, error }
            }
        });
        self.resolve(pending, result);
    }

    fn finish(
        &self,
        pending: &PendingCommand<K>,
        event: K::Event,
        mutator: &dyn Fn(&mut K::Payload),
    ) -> std::result::Result<Record<K>, EngineError> {
        let id = pending.resource_id;
        let record = self
            .engine
            .store()
            .find_by_id(id)?
            .ok_or(EngineError::NotFound { kind: K::NAME, id })?;
        self.engine.transition(&record, event, mutator)
    }

    fn resolve(&self, pending: PendingCommand<K>, result: Completion<K>) {
        let elapsed_ms = pending.dispatched_at.elapsed().as_millis();
        match &result {
            Ok(outcome) => info!(
                kind = K::NAME,
                resource_id = %pending.resource_id,
                correlation_id = %pending.correlation_id,
                success = outcome.is_success(),
                state = %outcome.record().state,
                elapsed_ms,
                "Command resolved"
            ),
            Err(e) => error!(
                kind = K::NAME,
                resource_id = %pending.resource_id,
                correlation_id = %pending.correlation_id,
                error = %e,
                "Final transition failed"
            ),
        }
        if pending.completion.send(result).is_err() {
            debug!(correlation_id = %pending.correlation_id, "No caller waiting on command");
        }
    }

    fn take(&self, correlation_id: CorrelationId) -> Option<PendingCommand<K>> {
        self.pending.lock().remove(&correlation_id)
    }
}
