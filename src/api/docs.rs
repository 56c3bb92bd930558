//! API Documentation
//!
//! Serves the OpenAPI document at /api-docs/openapi.json

use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use super::builds::{
    BuildRecordView, ObjectStorageRequest, PushRequest, StartBuildRequest, StartBuildResponse,
};

/// Kiln API OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kiln API",
        version = "1.0.0",
        description = "Container image build and publish service.

Builds are admitted into a bounded queue and executed asynchronously. Poll
`GET /api/v1/builds/{id}` or stream `GET /api/v1/builds/{id}/events`
(WebSocket) until the build finishes.

Every JSON response is wrapped in an envelope
`{ success, data, error, error_type }` where `error_type` is `BAD_REQUEST`
or `INTERNAL_ERROR`.
",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "/", description = "Local server")
    ),
    paths(
        crate::api::builds::handlers::start_build,
        crate::api::builds::handlers::get_build_status,
        crate::api::builds::handlers::cancel_build,
    ),
    components(
        schemas(
            StartBuildRequest,
            PushRequest,
            ObjectStorageRequest,
            StartBuildResponse,
            BuildRecordView,
        )
    ),
    tags(
        (name = "builds", description = "Build admission and status"),
    )
)]
pub struct ApiDoc;

/// Create documentation routes
pub fn docs_routes() -> Router {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}
