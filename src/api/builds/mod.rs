//! Builds API endpoints
//!
//! POST /api/v1/builds - Start a build
//! GET /api/v1/builds/:id - Get build status
//! POST /api/v1/builds/:id/cancel - Cancel a build (returns current status)

pub mod handlers;
pub mod types;


pub use handlers::{cancel_build, get_build_status, start_build};
pub use types::{
    BuildRecordView, ObjectStorageRequest, PushRequest, StartBuildRequest, StartBuildResponse,
};

use axum::{
    routing::{get, post},
    Router,
};

/// Create builds routes
pub fn builds_routes() -> Router {
    Router::new()
        .route("/api/v1/builds", post(start_build))
        .route("/api/v1/builds/:id", get(get_build_status))
        .route("/api/v1/builds/:id/cancel", post(cancel_build))
}
