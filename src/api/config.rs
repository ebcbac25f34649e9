use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::path::Path;

use super::{blocking, ApiError, ApiResult, AppContext};
use crate::error::Error;

/// Current effective configuration: server settings plus the
/// user-mutable settings persisted in the store.
pub async fn get_config(State(ctx): State<AppContext>) -> ApiResult<impl IntoResponse> {
    let db = ctx.db.clone();
    let (roots, face_enabled, threshold, batch_size, ocr_languages) = blocking(move || {
        Ok((
            db.get_roots()?,
            db.get_bool_setting("face_search_enabled", false)?,
            db.get_f32_setting("face_match_threshold", 0.45)?,
            db.get_setting("batch_size")?,
            db.get_setting("ocr_languages")?,
        ))
    })
    .await?;

    Ok(Json(serde_json::json!({
        "roots": roots,
        "face_search_enabled": face_enabled,
        "face_match_threshold": threshold,
        "batch_size": batch_size
            .and_then(|b| b.parse::<usize>().ok())
            .unwrap_or(ctx.config.batch_size),
        "ocr_languages": ocr_languages
            .map(|l| l.split(',').map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default(),
        "data_dir": ctx.config.data_dir,
        "thumbnails_dir": ctx.config.thumbnails_dir(),
        "max_workers": ctx.config.max_workers,
    })))
}

#[derive(Deserialize)]
pub struct RootsBody {
    pub roots: Vec<String>,
}

/// Replace the crawl roots. Paths must exist and be directories.
pub async fn set_roots(
    State(ctx): State<AppContext>,
    Json(body): Json<RootsBody>,
) -> ApiResult<impl IntoResponse> {
    for root in &body.roots {
        let path = Path::new(root);
        if !path.is_dir() {
            return Err(ApiError(Error::Invalid(format!(
                "root '{root}' is not an existing directory"
            ))));
        }
    }

    let db = ctx.db.clone();
    let roots = body.roots.clone();
    blocking(move || db.set_roots(&roots)).await?;
    Ok(Json(serde_json::json!({ "roots": body.roots })))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    pub face_search_enabled: Option<bool>,
    pub face_match_threshold: Option<f32>,
    pub batch_size: Option<usize>,
    pub ocr_languages: Option<Vec<String>>,
}

/// Update individual settings fields.
pub async fn update_config(
    State(ctx): State<AppContext>,
    Json(update): Json<ConfigUpdate>,
) -> ApiResult<impl IntoResponse> {
    if let Some(threshold) = update.face_match_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ApiError(Error::Invalid(
                "face_match_threshold must be in [0, 1]".to_string(),
            )));
        }
    }
    if let Some(batch_size) = update.batch_size {
        if batch_size == 0 {
            return Err(ApiError(Error::Invalid(
                "batch_size must be at least 1".to_string(),
            )));
        }
    }

    let db = ctx.db.clone();
    blocking(move || {
        if let Some(enabled) = update.face_search_enabled {
            db.set_setting("face_search_enabled", if enabled { "true" } else { "false" })?;
        }
        if let Some(threshold) = update.face_match_threshold {
            db.set_setting("face_match_threshold", &threshold.to_string())?;
        }
        if let Some(batch_size) = update.batch_size {
            db.set_setting("batch_size", &batch_size.to_string())?;
        }
        if let Some(languages) = update.ocr_languages {
            db.set_setting("ocr_languages", &languages.join(","))?;
        }
        Ok(())
    })
    .await?;

    Ok(Json(serde_json::json!({ "updated": true })))
}
