//! Nimbus control plane service.
//!
//! Configuration is read from the environment (see [`ControlConfig`]).
//! Without `AGENT_URL` the service still starts, but every dispatch fails
//! fast with an unavailable agent.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nimbus_bus::Subscriber;
use nimbus_control::{
    create_router, AppState, ControlConfig, ControlPlane, Reconciler, UsageRecorder, USAGE_TOPIC,
};
use nimbus_dispatch::{
    AgentEndpoint, AgentSelector, HttpAgentTransport, StaticAgentSelector, TracingAlertSink,
};
use nimbus_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,nimbus=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Nimbus control plane");

    let config = ControlConfig::from_env();
    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        agent_url = ?config.agent_url,
        command_timeout_secs = config.command_timeout_seconds,
        stuck_after_secs = config.stuck_after_seconds,
        "Configuration loaded"
    );

    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&config.data_dir)?);

    let transport = Arc::new(HttpAgentTransport::new(config.agent_request_timeout())?);
    let selector: Arc<dyn AgentSelector> = match &config.agent_url {
        Some(url) => {
            tracing::info!(agent_url = %url, "Agent integration enabled");
            Arc::new(StaticAgentSelector::new(AgentEndpoint::new(url.clone())))
        }
        None => {
            tracing::warn!("No AGENT_URL set - commands will fail with no agent available");
            Arc::new(StaticAgentSelector::unavailable())
        }
    };

    let listen_addr = config.listen_addr.clone();
    let control = Arc::new(ControlPlane::new(
        store,
        transport,
        selector,
        Arc::new(TracingAlertSink),
        config,
    )?);

    control.subscribe(USAGE_TOPIC, Arc::new(UsageRecorder::new()) as Arc<dyn Subscriber>)?;

    tokio::spawn(Reconciler::new(Arc::clone(&control)).run());
    tracing::info!("Recovery sweep started");

    let app = create_router(AppState { control });

    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
