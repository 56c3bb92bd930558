//! Server initialization
//!
//! Wires the store, event log, event bus, builder and engine together, builds
//! the router and runs it until a shutdown signal arrives.

use anyhow::{Context, Result};
use axum::{routing::get, Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use kiln_core::{
    shutdown_signal_with_controller, BuildEngine, BuildStore, DockerCliBuilder, EventLog,
    EventSubscriber, ImageBuilder, LogEventBus, MemoryBuildStore, MemoryLog, RedisStreamLog,
    ShutdownController, SqliteBuildStore,
};

use super::config::{AppConfig, EventLogConfig, StorageConfig};
use super::loader::{environment_name, load_config};

/// Shared handles reachable from every handler through `Extension`
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BuildEngine>,
    pub events: Arc<dyn EventSubscriber>,
    pub shutdown: Arc<ShutdownController>,
}

/// Build the HTTP router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(crate::api::health_routes())
        .merge(crate::api::docs_routes())
        .merge(crate::api::builds_routes())
        .merge(crate::api::events_routes())
        .route("/", get(|| async { "Kiln image build service" }))
        .layer(Extension(state.engine))
        .layer(Extension(state.events))
        .layer(Extension(state.shutdown))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn init_store(config: &StorageConfig) -> Result<Arc<dyn BuildStore>> {
    let store: Arc<dyn BuildStore> = match config.backend.as_str() {
        "memory" => {
            warn!("Using in-memory build store; build records are lost on restart");
            Arc::new(MemoryBuildStore::new())
        }
        _ => {
            let store = SqliteBuildStore::from_path(&config.path)
                .await
                .with_context(|| format!("Failed to open {}", config.path.display()))?;
            info!(path = %config.path.display(), "SQLite build store initialized");
            Arc::new(store)
        }
    };
    Ok(store)
}

fn init_event_log(config: &EventLogConfig) -> Result<Arc<dyn EventLog>> {
    let log: Arc<dyn EventLog> = match config.backend.as_str() {
        "redis" => {
            let log = RedisStreamLog::new(
                &config.redis_url,
                &config.topic,
                config.partitions,
                config.max_len,
                Duration::from_millis(config.poll_interval_ms),
            )
            .context("Failed to configure Redis event log")?;
            info!(
                topic = %config.topic,
                partitions = config.partitions,
                "Redis stream event log initialized"
            );
            Arc::new(log)
        }
        _ => {
            info!(
                partitions = config.partitions,
                buffer = config.buffer,
                "In-memory event log initialized"
            );
            Arc::new(MemoryLog::new(config.partitions, config.buffer))
        }
    };
    Ok(log)
}

/// Run the server
pub async fn run() -> Result<()> {
    info!("Starting Kiln v{}", env!("CARGO_PKG_VERSION"));

    let config: AppConfig = load_config().context("Failed to load configuration")?;
    info!(environment = %environment_name(), "Configuration loaded");

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Configuration error: {}", e);
        }
        anyhow::bail!("Invalid configuration: {}", errors.join("; "));
    }

    let shutdown = ShutdownController::with_timeout(config.shutdown_timeout());

    let store = init_store(&config.storage).await?;
    let log = init_event_log(&config.event_log)?;
    let bus = Arc::new(LogEventBus::new(log, config.event_log.max_pending_sends));

    let builder: Arc<dyn ImageBuilder> =
        Arc::new(DockerCliBuilder::new(config.builder.clone(), bus.clone()));

    let (engine, receiver) = BuildEngine::new(
        store,
        bus.clone(),
        builder,
        &config.queue,
        shutdown.clone(),
    );
    let dispatcher = engine.spawn_workers(receiver);

    let app = build_router(AppState {
        engine,
        events: bus,
        shutdown: shutdown.clone(),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_controller(shutdown.clone()))
        .await
        .context("HTTP server error")?;

    match tokio::time::timeout(Duration::from_secs(5), dispatcher).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Dispatcher task error: {}", e),
        Err(_) => warn!("Dispatcher shutdown timeout"),
    }

    info!("Kiln shutdown complete");
    Ok(())
}
