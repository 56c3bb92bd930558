use axum::{
    extract::{rejection::JsonRejection, Path},
    Extension, Json,
};
use kiln_core::{BuildEngine, BuildId};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::super::{ApiError, ApiResponse, ApiResult};
use super::types::{BuildRecordView, StartBuildRequest, StartBuildResponse};

fn parse_build_id(raw: &str) -> Result<BuildId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::bad_request(format!("invalid build id '{}': {}", raw, e)))
}

/// Start a build
#[utoipa::path(
    post,
    path = "/api/v1/builds",
    tag = "builds",
    request_body = StartBuildRequest,
    responses(
        (status = 200, description = "Build admitted", body = StartBuildResponse),
        (status = 400, description = "Invalid request or build queue full"),
        (status = 500, description = "Build record could not be created")
    )
)]
pub async fn start_build(
    Extension(engine): Extension<Arc<BuildEngine>>,
    body: Result<Json<StartBuildRequest>, JsonRejection>,
) -> ApiResult<StartBuildResponse> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let id = engine.submit(body.into()).await?;
    Ok(Json(ApiResponse::success(StartBuildResponse {
        build_id: id.as_uuid(),
    })))
}

/// Get build status
#[utoipa::path(
    get,
    path = "/api/v1/builds/{id}",
    tag = "builds",
    params(
        ("id" = Uuid, Path, description = "Build ID")
    ),
    responses(
        (status = 200, description = "Build record", body = BuildRecordView),
        (status = 400, description = "Malformed or unknown build ID")
    )
)]
pub async fn get_build_status(
    Extension(engine): Extension<Arc<BuildEngine>>,
    Path(id): Path<String>,
) -> ApiResult<BuildRecordView> {
    let id = parse_build_id(&id)?;
    let record = engine.get_status(id).await?;
    Ok(Json(ApiResponse::success(record.into())))
}

/// Cancel a build
///
/// In-flight cancellation is not supported; the current record is returned
/// unchanged.
#[utoipa::path(
    post,
    path = "/api/v1/builds/{id}/cancel",
    tag = "builds",
    params(
        ("id" = Uuid, Path, description = "Build ID")
    ),
    responses(
        (status = 200, description = "Current build record", body = BuildRecordView),
        (status = 400, description = "Malformed or unknown build ID")
    )
)]
pub async fn cancel_build(
    Extension(engine): Extension<Arc<BuildEngine>>,
    Path(id): Path<String>,
) -> ApiResult<BuildRecordView> {
    let id = parse_build_id(&id)?;
    debug!(build_id = %id, "Cancel requested");
    let record = engine.cancel(id).await?;
    Ok(Json(ApiResponse::success(record.into())))
}
