//! Listing and streaming-token handlers.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::errors::Result;
use crate::streaming::STREAM_TOKEN_TTL_SECS;

#[derive(Deserialize)]
pub(crate) struct FilesQuery {
    email_id: String,
}

#[derive(Serialize)]
struct FileEntry {
    key: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
}

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<FileEntry>,
    count: usize,
}

#[derive(Deserialize)]
pub(crate) struct TokenRequest {
    email_id: String,
    s3_key: String,
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
    expires_in: i64,
    s3_key: String,
}

pub(crate) async fn list(
    State(state): State<AppState>,
    Query(query): Query<FilesQuery>,
) -> Result<Response> {
    let entries = state.coordinator.list_files(&query.email_id).await?;
    let files: Vec<FileEntry> = entries
        .into_iter()
        .map(|entry| FileEntry {
            key: entry.key,
            size: entry.size,
            last_modified: entry.last_modified.map(|t| t.to_rfc3339()),
        })
        .collect();
    let count = files.len();
    Ok(Json(FilesResponse { files, count }).into_response())
}

pub(crate) async fn streaming_token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> Result<Response> {
    let token = state
        .streaming
        .mint_token(&request.email_id, &request.s3_key)?;
    Ok(Json(TokenResponse {
        token: token.token,
        expires_in: STREAM_TOKEN_TTL_SECS,
        s3_key: request.s3_key,
    })
    .into_response())
}
