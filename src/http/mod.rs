//! HTTP surface: thin request parsing and dispatch onto the upload
//! coordinator and streaming service.

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::{self, TraceLayer};

use crate::streaming::StreamingService;
use crate::uploads::UploadCoordinator;

pub(crate) mod files;
pub(crate) mod stream;
pub(crate) mod upload;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<UploadCoordinator>,
    pub streaming: Arc<StreamingService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/upload/init", post(upload::init))
        .route("/upload/chunk", post(upload::chunk))
        .route("/upload/complete", post(upload::complete))
        .route("/upload/cancel", post(upload::cancel))
        .route("/files", get(files::list))
        .route("/files/streaming-token", post(files::streaming_token))
        .route("/stream", get(stream::stream))
        .route("/health", get(health))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new())
                .on_response(trace::DefaultOnResponse::new())
                .on_request(trace::DefaultOnRequest::new()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}
