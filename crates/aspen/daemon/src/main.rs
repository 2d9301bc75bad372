//! `aspend` - the ASPEN supervision daemon.
//!
//! Wires storage, platform clients, the action dispatcher, and the engine
//! together, serves the REST API, and runs the recurring evaluation loop.

mod api;
mod config;
mod error;
mod scheduler;
mod state;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aspen_actions::{
    ActionDispatcher, HttpNotificationChannel, LogNotificationChannel, NotificationChannel,
};
use aspen_engine::EngineBuilder;
use aspen_platform::{ClientRegistry, HealthService, InMemoryPlatform};
use aspen_store::{
    AgentRepository, ConnectionRepository, EntityCatalog, EntityStateRepository, EventStore,
    InMemoryAgentRepository, InMemoryConnectionRepository, InMemoryEntityCatalog,
    InMemoryEntityStateRepository, InMemoryEventStore, InMemoryMetricSource, MetricSource,
};
use aspen_types::Provider;

use crate::config::DaemonConfig;
use crate::scheduler::Scheduler;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "aspend", about = "ASPEN campaign supervision daemon")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, env = "ASPEND_CONFIG")]
    config: Option<String>,

    /// Override the bind address
    #[arg(long, env = "ASPEND_BIND")]
    bind: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "ASPEND_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

struct Stores {
    agents: Arc<dyn AgentRepository>,
    entity_states: Arc<dyn EntityStateRepository>,
    catalog: Arc<dyn EntityCatalog>,
    connections: Arc<dyn ConnectionRepository>,
    events: Arc<dyn EventStore>,
    metrics: Arc<dyn MetricSource>,
}

async fn build_stores(config: &DaemonConfig) -> anyhow::Result<Stores> {
    #[cfg(feature = "postgres")]
    if let Some(database) = &config.database {
        let store = Arc::new(
            aspen_store::postgres::PostgresStore::new(
                &database.url,
                database.max_connections,
                database.connect_timeout_secs,
            )
            .await
            .context("connecting to postgres")?,
        );
        info!("storage: postgres");
        return Ok(Stores {
            agents: store.clone(),
            entity_states: store.clone(),
            catalog: store.clone(),
            connections: store.clone(),
            events: store,
            // Metric storage is owned by the ingestion pipeline; the
            // in-memory source serves until one is wired in.
            metrics: Arc::new(InMemoryMetricSource::new()),
        });
    }

    #[cfg(not(feature = "postgres"))]
    if config.database.is_some() {
        anyhow::bail!("database configured but the daemon was built without the postgres feature");
    }

    info!("storage: in-memory (development only)");
    Ok(Stores {
        agents: Arc::new(InMemoryAgentRepository::new()),
        entity_states: Arc::new(InMemoryEntityStateRepository::new()),
        catalog: Arc::new(InMemoryEntityCatalog::new()),
        connections: Arc::new(InMemoryConnectionRepository::new()),
        events: Arc::new(InMemoryEventStore::new()),
        metrics: Arc::new(InMemoryMetricSource::new()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = DaemonConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    let stores = build_stores(&config).await?;

    let notifier: Arc<dyn NotificationChannel> = match &config.notification_endpoint {
        Some(endpoint) => Arc::new(HttpNotificationChannel::new(endpoint.clone())),
        None => Arc::new(LogNotificationChannel::new()),
    };

    // Platform clients are injected per deployment; the built-in in-memory
    // platforms serve development and integration environments.
    let clients = ClientRegistry::new()
        .register(Arc::new(InMemoryPlatform::new(Provider::Meta)))
        .register(Arc::new(InMemoryPlatform::new(Provider::Google)));

    let dispatcher = Arc::new(ActionDispatcher::new(
        stores.connections.clone(),
        clients,
        Arc::new(HealthService::new()),
        notifier.clone(),
    ));

    let orchestrator = Arc::new(
        EngineBuilder::new()
            .with_agents(stores.agents.clone())
            .with_entity_states(stores.entity_states.clone())
            .with_catalog(stores.catalog.clone())
            .with_events(stores.events.clone())
            .with_metrics(stores.metrics.clone())
            .with_dispatcher(dispatcher)
            .with_notifier(notifier)
            .with_engine_config(config.engine.clone())
            .with_guard_config(config.guards.clone())
            .build()
            .context("assembling engine")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(orchestrator.clone(), Duration::from_secs(config.tick_seconds));
    let scheduler_handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let app = api::create_router(AppState {
        orchestrator,
        agents: stores.agents,
        events: stores.events,
        started_at: chrono::Utc::now(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "aspend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving api")?;

    // Let an in-flight cycle finish before exiting.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;
    info!("aspend stopped");
    Ok(())
}
