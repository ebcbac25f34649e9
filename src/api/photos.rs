use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::{blocking, ApiError, ApiResult, AppContext};
use crate::error::Error;

/// GET /photos/{id}/original - serve the photo file bytes.
pub async fn original(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let db = ctx.db.clone();
    let photo = blocking(move || db.get_photo(id))
        .await?
        .ok_or_else(|| ApiError(Error::NotFound(format!("photo {id}"))))?;

    let bytes = tokio::fs::read(&photo.path)
        .await
        .map_err(|_| ApiError(Error::NotFound(format!("file missing for photo {id}"))))?;

    let content_type = match photo.ext.to_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "tiff" => "image/tiff",
        "heic" | "heif" => "image/heic",
        _ => "application/octet-stream",
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", photo.filename),
            ),
        ],
        bytes,
    ))
}

#[derive(Deserialize)]
pub struct SimilarParams {
    pub top_k: Option<usize>,
}

/// GET /photos/{id}/similar - reverse-photo search from a stored
/// embedding, excluding the photo itself.
pub async fn similar(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
    Query(params): Query<SimilarParams>,
) -> ApiResult<impl IntoResponse> {
    let response = ctx
        .query
        .reverse(id, params.top_k.unwrap_or(20).clamp(1, 200))
        .await?;
    Ok(Json(response))
}
