use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use super::{ApiError, ApiResult, AppContext};
use crate::batch::{DeleteRequest, ExportRequest, TagRequest};
use crate::error::Error;

/// POST /batch/export - copy photos to a destination directory.
pub async fn export(
    State(ctx): State<AppContext>,
    Json(request): Json<ExportRequest>,
) -> ApiResult<impl IntoResponse> {
    let job_id = ctx.batch.submit_export(request)?;
    Ok(Json(serde_json::json!({ "job_id": job_id })))
}

/// POST /batch/delete - move photos to trash (or delete permanently).
pub async fn delete_photos(
    State(ctx): State<AppContext>,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<impl IntoResponse> {
    let job_id = ctx.batch.submit_delete(request)?;
    Ok(Json(serde_json::json!({ "job_id": job_id })))
}

/// POST /batch/tag - add/remove/replace tags.
pub async fn tag(
    State(ctx): State<AppContext>,
    Json(request): Json<TagRequest>,
) -> ApiResult<impl IntoResponse> {
    let job_id = ctx.batch.submit_tag(request)?;
    Ok(Json(serde_json::json!({ "job_id": job_id })))
}

/// GET /batch/status/{id}
pub async fn status(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = ctx
        .batch
        .job_status(&id)
        .ok_or_else(|| ApiError(Error::NotFound(format!("job {id}"))))?;
    Ok(Json(snapshot))
}

/// GET /batch/jobs
pub async fn jobs(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({ "jobs": ctx.batch.list_jobs() }))
}

/// DELETE /batch/jobs/{id} - request cancellation.
pub async fn cancel(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if ctx.batch.job_status(&id).is_none() {
        return Err(ApiError(Error::NotFound(format!("job {id}"))));
    }
    let cancelled = ctx.batch.cancel_job(&id);
    if !cancelled {
        return Err(ApiError(Error::BadRequest(format!(
            "job {id} is not running"
        ))));
    }
    Ok(Json(serde_json::json!({ "cancelling": id })))
}
