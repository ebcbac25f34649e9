use axum::extract::{Multipart, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::{ApiError, ApiResult, AppContext};
use crate::db::SearchFilters;
use crate::error::Error;
use crate::fusion::{self, FusionMethod, ResultSets, SearchType, SourceHit};

const DEFAULT_TOP_K: usize = 50;
const MAX_TOP_K: usize = 500;

fn clamp_top_k(top_k: Option<usize>) -> usize {
    top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K)
}

#[derive(Deserialize)]
pub struct TextParams {
    pub q: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub folder: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// GET /search - keyword text search with filters.
pub async fn text(
    State(ctx): State<AppContext>,
    Query(params): Query<TextParams>,
) -> ApiResult<impl IntoResponse> {
    let filters = SearchFilters {
        folder_prefix: params.folder,
        date_from: params.from,
        date_to: params.to,
        extensions: None,
    };
    let response = ctx
        .query
        .text(
            params.q,
            filters,
            params.limit.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K),
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct SemanticBody {
    pub text: String,
    pub top_k: Option<usize>,
}

/// POST /search/semantic - free-form prompt over the vector index.
pub async fn semantic(
    State(ctx): State<AppContext>,
    Json(body): Json<SemanticBody>,
) -> ApiResult<impl IntoResponse> {
    if body.text.trim().is_empty() {
        return Err(ApiError(Error::BadRequest(
            "text must not be empty".to_string(),
        )));
    }
    let response = ctx
        .query
        .semantic(body.text, clamp_top_k(body.top_k))
        .await?;
    Ok(Json(response))
}

/// POST /search/image - multipart upload, reverse-image search.
pub async fn image(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut bytes: Option<Vec<u8>> = None;
    let mut top_k: Option<usize> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(Error::BadRequest(format!("bad multipart body: {e}"))))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                if let Some(content_type) = field.content_type() {
                    if !content_type.starts_with("image/") {
                        return Err(ApiError(Error::BadRequest(format!(
                            "expected an image upload, got {content_type}"
                        ))));
                    }
                }
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError(Error::BadRequest(format!("upload failed: {e}"))))?;
                bytes = Some(data.to_vec());
            }
            Some("top_k") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError(Error::BadRequest(format!("bad top_k field: {e}"))))?;
                top_k = text.parse().ok();
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| {
        ApiError(Error::BadRequest(
            "multipart field 'file' is required".to_string(),
        ))
    })?;
    let response = ctx.query.image(bytes, clamp_top_k(top_k)).await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct FacesBody {
    pub person_id: i64,
    pub top_k: Option<usize>,
}

/// POST /search/faces - photos of an enrolled person.
pub async fn faces(
    State(ctx): State<AppContext>,
    Json(body): Json<FacesBody>,
) -> ApiResult<impl IntoResponse> {
    let response = ctx
        .query
        .face(body.person_id, clamp_top_k(body.top_k))
        .await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct FusedBody {
    /// Keyword query for the text source.
    pub q: Option<String>,
    /// Prompt for the semantic source.
    pub text: Option<String>,
    pub top_k: Option<usize>,
    /// rrf | weighted_sum | borda_count; defaults per query shape.
    pub method: Option<FusionMethod>,
}

/// POST /search/fused - run text and semantic retrieval and merge the
/// rankings with rank fusion.
pub async fn fused(
    State(ctx): State<AppContext>,
    Json(body): Json<FusedBody>,
) -> ApiResult<impl IntoResponse> {
    if body.q.is_none() && body.text.is_none() {
        return Err(ApiError(Error::BadRequest(
            "at least one of 'q' or 'text' is required".to_string(),
        )));
    }
    let top_k = clamp_top_k(body.top_k);

    let mut sets = ResultSets::new();
    let mut items_by_id = std::collections::HashMap::new();

    if let Some(q) = &body.q {
        let response = ctx
            .query
            .text(q.clone(), SearchFilters::default(), top_k, 0)
            .await?;
        sets.insert(
            SearchType::Text,
            response
                .items
                .iter()
                .map(|item| SourceHit {
                    file_id: item.file_id,
                    score: item.score,
                })
                .collect(),
        );
        for item in response.items {
            items_by_id.entry(item.file_id).or_insert(item);
        }
    }

    if let Some(prompt) = &body.text {
        // A missing embedding model only disables this source; the
        // text source still answers.
        match ctx.query.semantic(prompt.clone(), top_k).await {
            Ok(response) => {
                sets.insert(
                    SearchType::Semantic,
                    response
                        .items
                        .iter()
                        .map(|item| SourceHit {
                            file_id: item.file_id,
                            score: item.score,
                        })
                        .collect(),
                );
                for item in response.items {
                    items_by_id.entry(item.file_id).or_insert(item);
                }
            }
            Err(e @ Error::Unavailable(_)) if body.q.is_some() => {
                tracing::warn!(error = %e, "Semantic source unavailable for fused search");
            }
            Err(e) => return Err(ApiError(e)),
        }
    }

    let query_shape = match (&body.q, &body.text) {
        (Some(_), Some(_)) => "mixed",
        (Some(_), None) => "text",
        _ => "mixed",
    };
    let (weights, default_method) = fusion::recommended(query_shape);
    let method = body.method.unwrap_or(default_method);

    let fused = fusion::fuse(&sets, &weights, method, fusion::DEFAULT_RRF_K, top_k);
    let items: Vec<serde_json::Value> = fused
        .into_iter()
        .filter_map(|result| {
            items_by_id.get(&result.file_id).map(|item| {
                serde_json::json!({
                    "file_id": result.file_id,
                    "path": item.path,
                    "folder": item.folder,
                    "filename": item.filename,
                    "thumb_path": item.thumb_path,
                    "shot_dt": item.shot_dt,
                    "score": result.score,
                    "rank": result.rank,
                    "badges": item.badges,
                    "sources": result.sources,
                })
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "items": items,
        "method": method,
    })))
}
