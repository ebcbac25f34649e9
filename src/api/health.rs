use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use super::{blocking, ApiResult, AppContext};

/// Basic liveness plus version.
pub async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": ctx.started_at.elapsed().as_secs(),
    }))
}

/// Full dependency report: store, vector index, event queue, workers.
pub async fn detailed(State(ctx): State<AppContext>) -> ApiResult<impl IntoResponse> {
    let db = ctx.db.clone();
    let (schema_version, counts) = blocking(move || {
        let version = db.schema_version()?;
        let counts = db.table_counts()?;
        Ok((version, counts))
    })
    .await?;

    let index_stats = ctx.index.stats();
    let queue_stats = ctx.events.stats();
    let pipeline = ctx.pipeline.state().snapshot().await;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": ctx.started_at.elapsed().as_secs(),
        "database": {
            "schema_version": schema_version,
            "tables": counts.into_iter().collect::<std::collections::BTreeMap<_, _>>(),
        },
        "vector_index": index_stats,
        "event_queue": queue_stats,
        "indexing": pipeline,
    })))
}

/// Ready to serve queries: the store must answer.
pub async fn ready(State(ctx): State<AppContext>) -> ApiResult<impl IntoResponse> {
    let db = ctx.db.clone();
    blocking(move || db.count_photos()).await?;
    Ok(Json(serde_json::json!({ "ready": true })))
}

pub async fn live() -> impl IntoResponse {
    Json(serde_json::json!({ "alive": true }))
}
