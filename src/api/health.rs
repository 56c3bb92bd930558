//! Health check endpoints
//!
//! - `/health` — simple "healthy" + version (for load balancers)
//! - `/health/detailed` — queue occupancy and shutdown phase

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use kiln_core::{BuildEngine, QueueStats, ShutdownController};
use serde::Serialize;
use std::sync::Arc;

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed health response
#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub phase: String,
    pub queue: QueueStats,
}

/// Simple health check (for load balancers)
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn detailed_health_check(
    Extension(engine): Extension<Arc<BuildEngine>>,
    Extension(shutdown): Extension<Arc<ShutdownController>>,
) -> Json<DetailedHealthResponse> {
    let queue = engine.queue_stats();
    let status = if !shutdown.is_accepting_work() {
        "stopping"
    } else if queue.pending >= queue.capacity {
        "saturated"
    } else {
        "healthy"
    };

    Json(DetailedHealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        phase: shutdown.phase().to_string(),
        queue,
    })
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
}
