//! HTTP API: thin axum handlers over the store, pipeline, query
//! engine, and batch manager. All errors surface as a structured
//! `{error, detail, request_id}` body with the status mapped from the
//! error kind.

mod batch;
mod config;
mod health;
mod indexing;
mod people;
mod photos;
mod search;

use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::batch::BatchManager;
use crate::config::Config;
use crate::db::Database;
use crate::error::Error;
use crate::events::EventQueue;
use crate::pipeline::Pipeline;
use crate::query::QueryEngine;
use crate::vecindex::VectorIndex;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub index: Arc<VectorIndex>,
    pub pipeline: Arc<Pipeline>,
    pub query: Arc<QueryEngine>,
    pub batch: Arc<BatchManager>,
    pub events: Arc<EventQueue>,
    pub started_at: Instant,
}

/// Error envelope for handlers. Everything non-`Cancelled` is logged
/// with the correlation id that also lands in the response body.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        let status = self.0.status_code();

        if !matches!(self.0, Error::Cancelled) {
            tracing::error!(request_id = %request_id, error = %self.0, "Request failed");
        }

        let body = serde_json::json!({
            "error": self.0.kind(),
            "detail": self.0.to_string(),
            "request_id": request_id,
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Hop a blocking closure over to the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(Error::storage(anyhow::anyhow!(e))))?
        .map_err(ApiError)
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        // Health
        .route("/health", get(health::health))
        .route("/health/detailed", get(health::detailed))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        // Config
        .route("/config", get(config::get_config).post(config::update_config))
        .route("/config/roots", post(config::set_roots))
        // Indexing
        .route("/index/start", post(indexing::start))
        .route("/index/stop", post(indexing::stop))
        .route("/index/status", get(indexing::status))
        .route("/index/stats", get(indexing::stats))
        // Search
        .route("/search", get(search::text))
        .route("/search/semantic", post(search::semantic))
        .route("/search/image", post(search::image))
        .route("/search/faces", post(search::faces))
        .route("/search/fused", post(search::fused))
        // Photos
        .route("/photos/{id}/original", get(photos::original))
        .route("/photos/{id}/similar", get(photos::similar))
        // People
        .route("/people", get(people::list).post(people::create))
        .route("/people/{id}", get(people::get_one).delete(people::remove))
        .route("/people/{id}/samples", post(people::add_samples))
        // Batch jobs
        .route("/batch/export", post(batch::export))
        .route("/batch/delete", post(batch::delete_photos))
        .route("/batch/tag", post(batch::tag))
        .route("/batch/status/{id}", get(batch::status))
        .route("/batch/jobs", get(batch::jobs))
        .route("/batch/jobs/{id}", delete(batch::cancel))
        // Image uploads are whole photos; the 2 MB default is too tight.
        .layer(axum::extract::DefaultBodyLimit::max(64 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
