//! Control plane service implementation.
//!
//! [`ResourceService`] exposes the caller-facing operations for one
//! resource kind. [`ControlPlane`] wires one service per kind to a shared
//! store, bus and agent transport, and routes agent answers to whichever
//! dispatcher issued the command.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nimbus_bus::{MessageBus, Subscriber, SubscriptionId};
use nimbus_core::{CoreError, Record, ResourceId, ResourceKind};
use nimbus_dispatch::{
    AgentSelector, AgentTransport, AlertSink, Answer, AnswerOutcome, DispatchHandle,
    DispatchRequest, Dispatcher,
};
use nimbus_fsm::{Engine, StateMachine};
use nimbus_store::VersionedStore;
use tracing::{debug, info};

use crate::error::{ControlError, Result};
use crate::kinds::{shared_fs, template, volume, SharedFs, TemplateCopy, Volume};
use crate::reconciler;
use crate::types::ControlConfig;

/// Lifecycle operations for one resource kind.
pub struct ResourceService<K: ResourceKind, S, T> {
    dispatcher: Dispatcher<K, S, T>,
    command_timeout: Duration,
}

impl<K: ResourceKind, S, T> Clone for ResourceService<K, S, T> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            command_timeout: self.command_timeout,
        }
    }
}

impl<K, S, T> ResourceService<K, S, T>
where
    K: ResourceKind,
    S: VersionedStore<K> + 'static,
    T: AgentTransport + 'static,
{
    /// Create a service around a dispatcher.
    #[must_use]
    pub const fn new(dispatcher: Dispatcher<K, S, T>) -> Self {
        Self {
            dispatcher,
            command_timeout: Duration::from_secs(ControlConfig::default_command_timeout()),
        }
    }

    /// Set the timeout used by [`Self::dispatch_command`].
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Timeout applied to commands sent through [`Self::dispatch_command`].
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// The engine used for transitions.
    #[must_use]
    pub fn engine(&self) -> &Engine<K, S> {
        self.dispatcher.engine()
    }

    /// The dispatcher used for commands.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<K, S, T> {
        &self.dispatcher
    }

    /// Record a new resource in `state`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Store` if the write fails.
    pub fn create(&self, state: K::State, payload: K::Payload) -> Result<Record<K>> {
        let record = self.engine().store().create(state, payload)?;
        info!(
            kind = K::NAME,
            resource_id = %record.id,
            state = %record.state,
            "Resource created"
        );
        Ok(record)
    }

    /// Get a resource by id.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ResourceNotFound` if no such resource exists.
    pub fn get(&self, id: ResourceId) -> Result<Record<K>> {
        self.engine()
            .store()
            .find_by_id(id)?
            .ok_or(ControlError::Core(CoreError::ResourceNotFound {
                kind: K::NAME,
                id,
            }))
    }

    /// List resources currently in `state`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Store` if the read fails.
    pub fn list_by_state(&self, state: K::State) -> Result<Vec<Record<K>>> {
        Ok(self.engine().store().list_by_state(state)?)
    }

    /// Apply `event` to resource `id` without contacting an agent.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransition` if the event is not legal in the current
    /// state and `Conflict` if the resource kept changing underneath us.
    pub fn request_transition(&self, id: ResourceId, event: K::Event) -> Result<Record<K>> {
        Ok(self.engine().request_transition(id, event)?)
    }

    /// Move resource `id` into its transitional state and send the command.
    ///
    /// Returns once the command is registered; await the handle for the
    /// outcome. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransition` or `Conflict` if the request event cannot
    /// be applied, in which case nothing is sent.
    pub fn dispatch_and_transition(
        &self,
        id: ResourceId,
        request: DispatchRequest<K>,
    ) -> Result<DispatchHandle<K>> {
        let record = self.get(id)?;
        Ok(self.dispatcher.dispatch(&record, request)?)
    }

    /// Like [`Self::dispatch_and_transition`], with the request built for
    /// the service's configured command timeout, e.g.
    /// `dispatch_command(id, shared_fs::start_request)`.
    ///
    /// # Errors
    ///
    /// As for [`Self::dispatch_and_transition`].
    pub fn dispatch_command(
        &self,
        id: ResourceId,
        build: impl FnOnce(Duration) -> DispatchRequest<K>,
    ) -> Result<DispatchHandle<K>> {
        self.dispatch_and_transition(id, build(self.command_timeout))
    }

    /// Whether resource `id` is at a rest point.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ResourceNotFound` if no such resource exists.
    pub fn is_settled(&self, id: ResourceId) -> Result<bool> {
        Ok(Engine::<K, S>::is_settled(&self.get(id)?))
    }

    /// Whether a command is outstanding for resource `id`.
    #[must_use]
    pub fn has_pending(&self, id: ResourceId) -> bool {
        self.dispatcher.has_pending(id)
    }

    /// Apply an answer if this service issued the command.
    fn try_answer(&self, answer: Answer) -> std::result::Result<AnswerOutcome, Answer> {
        if self.dispatcher.is_pending(answer.correlation_id) {
            Ok(self.dispatcher.on_answer(answer))
        } else {
            Err(answer)
        }
    }
}

/// The control plane: one service per resource kind over a shared store.
pub struct ControlPlane<S, T> {
    bus: Arc<MessageBus>,
    volumes: ResourceService<Volume, S, T>,
    filesystems: ResourceService<SharedFs, S, T>,
    templates: ResourceService<TemplateCopy, S, T>,
    config: ControlConfig,
}

impl<S, T> ControlPlane<S, T>
where
    S: VersionedStore<Volume> + VersionedStore<SharedFs> + VersionedStore<TemplateCopy> + 'static,
    T: AgentTransport + 'static,
{
    /// Build the control plane.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Machine` if a transition table is inconsistent.
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        selector: Arc<dyn AgentSelector>,
        alerts: Arc<dyn AlertSink>,
        config: ControlConfig,
    ) -> Result<Self> {
        let bus = Arc::new(MessageBus::new());
        let wiring = Wiring {
            store,
            bus: Arc::clone(&bus),
            transport,
            selector,
            alerts,
            conflict_retries: config.conflict_retries,
            command_timeout: config.command_timeout(),
        };

        let plane = Self {
            volumes: wiring.service(volume::machine()?),
            filesystems: wiring.service(shared_fs::machine()?),
            templates: wiring.service(template::machine()?),
            bus,
            config,
        };
        info!(
            conflict_retries = plane.config.conflict_retries,
            "Control plane initialized"
        );
        Ok(plane)
    }

    /// Volume operations.
    #[must_use]
    pub const fn volumes(&self) -> &ResourceService<Volume, S, T> {
        &self.volumes
    }

    /// Shared filesystem operations.
    #[must_use]
    pub const fn filesystems(&self) -> &ResourceService<SharedFs, S, T> {
        &self.filesystems
    }

    /// Template copy operations.
    #[must_use]
    pub const fn templates(&self) -> &ResourceService<TemplateCopy, S, T> {
        &self.templates
    }

    /// The bus state changes are published on.
    #[must_use]
    pub const fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Subscribe to `topic` and everything below it.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Bus` for a malformed topic.
    pub fn subscribe(&self, topic: &str, subscriber: Arc<dyn Subscriber>) -> Result<SubscriptionId> {
        Ok(self.bus.subscribe(topic, subscriber)?)
    }

    /// Remove a subscription.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Bus` for a malformed topic.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> Result<()> {
        Ok(self.bus.unsubscribe(topic, id)?)
    }

    /// Route an agent's answer to the dispatcher that issued the command.
    ///
    /// Answers whose correlation id no dispatcher knows are discarded.
    pub fn deliver_answer(&self, answer: Answer) -> AnswerOutcome {
        let correlation_id = answer.correlation_id;
        let routed = self
            .volumes
            .try_answer(answer)
            .or_else(|answer| self.filesystems.try_answer(answer))
            .or_else(|answer| self.templates.try_answer(answer));

        routed.unwrap_or_else(|_| {
            debug!(%correlation_id, "Discarding answer for unknown command");
            AnswerOutcome::Discarded
        })
    }

    /// Number of commands awaiting an answer across all kinds.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.volumes.dispatcher().pending_count()
            + self.filesystems.dispatcher().pending_count()
            + self.templates.dispatcher().pending_count()
    }

    /// Recover resources stuck in a transitional state for longer than
    /// `stuck_after`. Returns how many were moved.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Store` if a sweep fails; kinds swept before the
    /// failure keep their recoveries.
    pub fn reconcile(&self, stuck_after: Duration) -> Result<usize> {
        let now = Utc::now();
        let recovered = reconciler::sweep(&self.volumes, stuck_after, now)?.len()
            + reconciler::sweep(&self.filesystems, stuck_after, now)?.len()
            + reconciler::sweep(&self.templates, stuck_after, now)?.len();
        Ok(recovered)
    }
}

struct Wiring<S, T> {
    store: Arc<S>,
    bus: Arc<MessageBus>,
    transport: Arc<T>,
    selector: Arc<dyn AgentSelector>,
    alerts: Arc<dyn AlertSink>,
    conflict_retries: u32,
    command_timeout: Duration,
}

impl<S, T: AgentTransport + 'static> Wiring<S, T> {
    fn service<K>(&self, machine: StateMachine<K>) -> ResourceService<K, S, T>
    where
        K: ResourceKind,
        S: VersionedStore<K> + 'static,
    {
        let engine = Engine::new(
            Arc::new(machine),
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
        )
        .with_max_conflict_retries(self.conflict_retries);
        ResourceService::new(Dispatcher::new(
            engine,
            Arc::clone(&self.selector),
            Arc::clone(&self.transport),
            Arc::clone(&self.alerts),
        ))
        .with_command_timeout(self.command_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{
        SharedFsEvent, SharedFsPayload, SharedFsState, TemplateEvent, TemplatePayload,
        TemplateState, VolumePayload, VolumeState,
    };
    use async_trait::async_trait;
    use nimbus_bus::FnSubscriber;
    use nimbus_core::{AnswerFields, CorrelationId, StateChange};
    use nimbus_dispatch::{
        AgentEndpoint, Alert, Command, CommandOutcome, NoopAgentTransport, StaticAgentSelector,
        TransportError, TIMEOUT_ERROR,
    };
    use nimbus_store::RocksStore;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingAlerts(Mutex<Vec<Alert>>);

    impl AlertSink for RecordingAlerts {
        fn alert(&self, alert: Alert) {
            self.0.lock().push(alert);
        }
    }

    /// Accepts every command and answers nothing, remembering what was sent.
    #[derive(Default)]
    struct AcceptingTransport {
        sent: Mutex<Vec<Command>>,
    }

    #[async_trait]
    impl AgentTransport for AcceptingTransport {
        async fn send(
            &self,
            _endpoint: &AgentEndpoint,
            command: &Command,
        ) -> std::result::Result<Option<Answer>, TransportError> {
            self.sent.lock().push(command.clone());
            Ok(None)
        }
    }

    struct Fixture<T> {
        plane: ControlPlane<RocksStore, T>,
        transport: Arc<T>,
        alerts: Arc<RecordingAlerts>,
        _dir: TempDir,
    }

    fn fixture<T: AgentTransport + Default + 'static>() -> Fixture<T> {
        fixture_with(ControlConfig::default())
    }

    fn fixture_with<T: AgentTransport + Default + 'static>(config: ControlConfig) -> Fixture<T> {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let transport = Arc::new(T::default());
        let alerts = Arc::new(RecordingAlerts::default());
        let plane = ControlPlane::new(
            store,
            Arc::clone(&transport),
            Arc::new(StaticAgentSelector::new(AgentEndpoint::new("http://agent:8250"))),
            Arc::clone(&alerts) as Arc<dyn AlertSink>,
            config,
        )
        .unwrap();
        Fixture {
            plane,
            transport,
            alerts,
            _dir: dir,
        }
    }

    /// Walk a new filesystem through deploy and stop.
    fn stopped_filesystem<T: AgentTransport + 'static>(
        plane: &ControlPlane<RocksStore, T>,
    ) -> Record<SharedFs> {
        let fs = plane.filesystems();
        let record = fs
            .create(SharedFsState::Allocated, SharedFsPayload::default())
            .unwrap();
        fs.request_transition(record.id, SharedFsEvent::DeployRequested)
            .unwrap();
        fs.request_transition(record.id, SharedFsEvent::OperationSucceeded)
            .unwrap();
        fs.request_transition(record.id, SharedFsEvent::StopRequested)
            .unwrap();
        let record = fs
            .request_transition(record.id, SharedFsEvent::OperationSucceeded)
            .unwrap();
        assert_eq!(record.state, SharedFsState::Stopped);
        assert_eq!(record.version, 5);
        record
    }

    #[tokio::test]
    async fn event_not_legal_from_allocated_is_rejected() {
        let f = fixture::<NoopAgentTransport>();
        let fs = f.plane.filesystems();
        let record = fs
            .create(SharedFsState::Allocated, SharedFsPayload::default())
            .unwrap();

        let err = fs
            .request_transition(record.id, SharedFsEvent::OperationSucceeded)
            .unwrap_err();

        assert!(matches!(err, ControlError::IllegalTransition { .. }));
        assert_eq!(err.http_status_code(), 409);
        let stored = fs.get(record.id).unwrap();
        assert_eq!(stored.state, SharedFsState::Allocated);
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn concurrent_start_requests_apply_once() {
        let f = fixture::<NoopAgentTransport>();
        let record = stopped_filesystem(&f.plane);
        let fs = f.plane.filesystems();

        let barrier = std::sync::Barrier::new(2);
        let results: Vec<Result<Record<SharedFs>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        fs.engine()
                            .transition(&record, SharedFsEvent::StartRequested, &|_| {})
                            .map_err(ControlError::from)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].state, SharedFsState::Starting);
        assert_eq!(winners[0].version, record.version + 1);

        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(
            matches!(loser, ControlError::IllegalTransition { state, .. } if state == "Starting"),
            "unexpected error: {loser:?}"
        );

        let stored = fs.get(record.id).unwrap();
        assert_eq!(stored.state, SharedFsState::Starting);
        assert_eq!(stored.version, record.version + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_start_times_out_back_to_stopped() {
        let f = fixture::<NoopAgentTransport>();
        let record = stopped_filesystem(&f.plane);
        let fs = f.plane.filesystems();

        let handle = fs
            .dispatch_and_transition(record.id, shared_fs::start_request(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(handle.record.state, SharedFsState::Starting);
        assert!(!fs.is_settled(record.id).unwrap());
        let correlation_id = handle.correlation_id;

        let outcome = handle.wait().await.unwrap();
        let CommandOutcome::TimedOut(timed_out) = outcome else {
            panic!("expected timeout, got {outcome:?}");
        };
        assert_eq!(timed_out.state, SharedFsState::Stopped);
        assert_eq!(timed_out.payload.error.as_deref(), Some(TIMEOUT_ERROR));
        assert!(fs.is_settled(record.id).unwrap());
        assert_eq!(f.alerts.0.lock().len(), 1);

        // A late answer five seconds later changes nothing.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let late = Answer::completed(correlation_id, AnswerFields::new());
        assert_eq!(f.plane.deliver_answer(late), AnswerOutcome::Discarded);

        let stored = fs.get(record.id).unwrap();
        assert_eq!(stored.state, SharedFsState::Stopped);
        assert_eq!(stored.version, timed_out.version);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_command_uses_configured_timeout() {
        let f = fixture_with::<NoopAgentTransport>(ControlConfig {
            command_timeout_seconds: 45,
            ..ControlConfig::default()
        });
        let record = stopped_filesystem(&f.plane);
        let fs = f.plane.filesystems();
        assert_eq!(fs.command_timeout(), Duration::from_secs(45));

        let started = tokio::time::Instant::now();
        let handle = fs.dispatch_command(record.id, shared_fs::start_request).unwrap();
        let outcome = handle.wait().await.unwrap();

        assert!(matches!(outcome, CommandOutcome::TimedOut(_)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(45), "timed out after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(60), "timed out after {elapsed:?}");
    }

    #[tokio::test]
    async fn answers_are_routed_to_the_issuing_kind() {
        let f = fixture::<AcceptingTransport>();
        let templates = f.plane.templates();
        let record = templates
            .create(
                TemplateState::Allocated,
                TemplatePayload {
                    url: Some("http://images/debian.qcow2".to_string()),
                    ..TemplatePayload::default()
                },
            )
            .unwrap();

        let handle = templates
            .dispatch_and_transition(
                record.id,
                template::download_request(
                    "http://images/debian.qcow2",
                    "pool-a",
                    None,
                    Duration::from_secs(600),
                ),
            )
            .unwrap();
        let correlation_id = handle.correlation_id;
        tokio::task::yield_now().await;
        assert_eq!(f.plane.pending_count(), 1);

        let mut heartbeat = Answer::in_progress(correlation_id, 40);
        heartbeat.details = Some("DOWNLOAD_IN_PROGRESS".to_string());
        assert_eq!(f.plane.deliver_answer(heartbeat), AnswerOutcome::Progress);
        let downloading = templates.get(record.id).unwrap();
        assert_eq!(downloading.state, TemplateState::Downloading);
        assert_eq!(downloading.payload.download_percent, Some(40));

        let mut fields = AnswerFields::new();
        fields.insert("install_path".to_string(), serde_json::json!("template/201.qcow2"));
        fields.insert("size".to_string(), serde_json::json!(1_073_741_824_u64));
        let answer = Answer::completed(correlation_id, fields);
        assert_eq!(f.plane.deliver_answer(answer.clone()), AnswerOutcome::Applied);
        assert_eq!(f.plane.deliver_answer(answer), AnswerOutcome::Discarded);

        let outcome = handle.wait().await.unwrap();
        assert!(outcome.is_success());
        let ready = outcome.record();
        assert_eq!(ready.state, TemplateState::Ready);
        assert_eq!(ready.payload.install_path.as_deref(), Some("template/201.qcow2"));
        assert_eq!(ready.payload.size, Some(1_073_741_824));
        assert_eq!(f.plane.pending_count(), 0);

        let sent = f.transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].resource_kind, "template_copy");
        assert_eq!(sent[0].params["pool"], "pool-a");
    }

    #[tokio::test]
    async fn unknown_answer_is_discarded() {
        let f = fixture::<NoopAgentTransport>();
        let answer = Answer::completed(CorrelationId::generate(), AnswerFields::new());
        assert_eq!(f.plane.deliver_answer(answer), AnswerOutcome::Discarded);
    }

    #[tokio::test]
    async fn illegal_dispatch_sends_nothing() {
        let f = fixture::<AcceptingTransport>();
        let templates = f.plane.templates();
        let record = templates
            .create(TemplateState::Ready, TemplatePayload::default())
            .unwrap();

        let err = templates
            .dispatch_and_transition(
                record.id,
                template::download_request("http://x", "pool-a", None, Duration::from_secs(5)),
            )
            .unwrap_err();

        assert!(matches!(err, ControlError::IllegalTransition { .. }));
        tokio::task::yield_now().await;
        assert!(f.transport.sent.lock().is_empty());
        assert_eq!(f.plane.pending_count(), 0);
    }

    #[tokio::test]
    async fn missing_resource_is_not_found() {
        let f = fixture::<NoopAgentTransport>();
        let err = f.plane.volumes().get(ResourceId::new(404)).unwrap_err();
        assert_eq!(err.http_status_code(), 404);

        let err = f
            .plane
            .volumes()
            .request_transition(ResourceId::new(404), crate::kinds::VolumeEvent::CreateRequested)
            .unwrap_err();
        assert_eq!(err.http_status_code(), 404);
    }

    #[tokio::test]
    async fn subscribers_see_changes_of_their_subtree_only() {
        let f = fixture::<NoopAgentTransport>();
        let seen: Arc<Mutex<Vec<StateChange>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = f
            .plane
            .subscribe(
                "volume",
                Arc::new(FnSubscriber::new(
                    move |_: &str, _: &str, payload: &serde_json::Value| {
                        sink.lock().push(serde_json::from_value(payload.clone()).unwrap());
                    },
                )),
            )
            .unwrap();

        let volume = f
            .plane
            .volumes()
            .create(VolumeState::Allocated, VolumePayload::default())
            .unwrap();
        f.plane
            .volumes()
            .request_transition(volume.id, crate::kinds::VolumeEvent::CreateRequested)
            .unwrap();
        let fs = f
            .plane
            .filesystems()
            .create(SharedFsState::Allocated, SharedFsPayload::default())
            .unwrap();
        f.plane
            .filesystems()
            .request_transition(fs.id, SharedFsEvent::DeployRequested)
            .unwrap();

        {
            let seen = seen.lock();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].kind, "volume");
            assert_eq!(seen[0].to, "Creating");
            assert!(!seen[0].settled);
        }

        f.plane.unsubscribe("volume", id).unwrap();
        f.plane
            .volumes()
            .request_transition(volume.id, crate::kinds::VolumeEvent::OperationSucceeded)
            .unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn malformed_topic_is_rejected() {
        let f = fixture::<NoopAgentTransport>();
        let noop = FnSubscriber::new(|_: &str, _: &str, _: &serde_json::Value| {});
        let err = f
            .plane
            .subscribe("volume..stateChanged", Arc::new(noop))
            .unwrap_err();
        assert_eq!(err.http_status_code(), 400);
    }

    #[tokio::test]
    async fn failed_template_download_can_be_retried() {
        let f = fixture::<AcceptingTransport>();
        let templates = f.plane.templates();
        let record = templates
            .create(TemplateState::Allocated, TemplatePayload::default())
            .unwrap();

        let first = templates
            .dispatch_and_transition(
                record.id,
                template::download_request("http://x", "pool-a", None, Duration::from_secs(60)),
            )
            .unwrap();
        let answer: Answer = serde_json::from_value(serde_json::json!({
            "correlation_id": first.correlation_id.to_string(),
            "success": false,
            "status": "DOWNLOAD_ERROR",
            "details": "checksum mismatch",
        }))
        .unwrap();
        assert_eq!(f.plane.deliver_answer(answer), AnswerOutcome::Applied);

        let failed = first.wait().await.unwrap();
        assert_eq!(failed.record().state, TemplateState::Failed);
        assert_eq!(
            failed.record().payload.error.as_deref(),
            Some("checksum mismatch")
        );

        let second = templates
            .request_transition(record.id, TemplateEvent::DownloadRequested)
            .unwrap();
        assert_eq!(second.state, TemplateState::Downloading);
    }
}
