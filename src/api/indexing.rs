use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::{blocking, ApiResult, AppContext};

#[derive(Deserialize, Default)]
pub struct StartBody {
    #[serde(default)]
    pub full: bool,
}

/// Begin an indexing run; 409 while one is active.
pub async fn start(
    State(ctx): State<AppContext>,
    body: Option<Json<StartBody>>,
) -> ApiResult<impl IntoResponse> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    ctx.pipeline.start(body.full).await?;
    Ok(Json(serde_json::json!({ "started": true, "full": body.full })))
}

/// Cooperative cancel; 400 when nothing is running.
pub async fn stop(State(ctx): State<AppContext>) -> ApiResult<impl IntoResponse> {
    ctx.pipeline.stop().await?;
    Ok(Json(serde_json::json!({ "stopping": true })))
}

pub async fn status(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.pipeline.state().snapshot().await)
}

/// Table counts, vector index stats, and the live run snapshot.
pub async fn stats(State(ctx): State<AppContext>) -> ApiResult<impl IntoResponse> {
    let db = ctx.db.clone();
    let counts = blocking(move || db.table_counts()).await?;

    Ok(Json(serde_json::json!({
        "tables": counts.into_iter().collect::<std::collections::BTreeMap<_, _>>(),
        "vector_index": ctx.index.stats(),
        "indexing": ctx.pipeline.state().snapshot().await,
    })))
}
