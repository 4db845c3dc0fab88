//! Upload lifecycle handlers.

use axum::extract::{Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::errors::{Error, Result};
use crate::uploads::{CancelOutcome, ChunkOutcome, CompleteReceipt, FinalizeOutcome};

#[derive(Deserialize)]
pub(crate) struct InitRequest {
    email_id: String,
    filename: String,
    file_size: u64,
    total_chunks: u32,
    chunk_size: u64,
}

#[derive(Serialize)]
struct InitResponse {
    session_id: String,
    s3_key: String,
    upload_id: String,
}

#[derive(Serialize)]
struct ChunkResponse {
    success: bool,
    duplicate: bool,
    chunk_index: u32,
    received: u32,
    total: u32,
    progress: f64,
}

#[derive(Serialize)]
struct CompletionResponse {
    success: bool,
    completed: bool,
    s3_key: String,
    file_size: u64,
}

#[derive(Serialize)]
struct FinalizingResponse {
    success: bool,
    completed: bool,
    status: &'static str,
}

#[derive(Deserialize)]
pub(crate) struct LifecycleRequest {
    email_id: String,
    session_id: String,
}

#[derive(Serialize)]
struct CancelResponse {
    status: &'static str,
}

pub(crate) async fn init(
    State(state): State<AppState>,
    Json(request): Json<InitRequest>,
) -> Result<Response> {
    let receipt = state
        .coordinator
        .init_upload(
            &request.email_id,
            &request.filename,
            request.file_size,
            request.total_chunks,
            request.chunk_size,
        )
        .await?;
    Ok(Json(InitResponse {
        session_id: receipt.session_id,
        s3_key: receipt.object_key,
        upload_id: receipt.upload_id,
    })
    .into_response())
}

pub(crate) async fn chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response> {
    let mut email_id: Option<String> = None;
    let mut session_id: Option<String> = None;
    let mut chunk_index: Option<u32> = None;
    let mut chunk: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("email_id") => email_id = Some(field.text().await?),
            Some("session_id") => session_id = Some(field.text().await?),
            Some("chunk_index") => {
                chunk_index = Some(
                    field
                        .text()
                        .await?
                        .parse()
                        .map_err(|_| Error::InvalidRequest("chunk_index must be an integer"))?,
                )
            }
            Some("chunk") => chunk = Some(field.bytes().await?),
            _ => continue,
        }
    }

    let email_id = email_id.ok_or(Error::InvalidRequest("missing field: email_id"))?;
    let session_id = session_id.ok_or(Error::InvalidRequest("missing field: session_id"))?;
    let chunk_index = chunk_index.ok_or(Error::InvalidRequest("missing field: chunk_index"))?;
    let chunk = chunk.ok_or(Error::InvalidRequest("missing field: chunk"))?;

    let outcome = state
        .coordinator
        .upload_chunk(&email_id, &session_id, chunk_index, chunk)
        .await?;

    Ok(match outcome {
        ChunkOutcome::Accepted {
            duplicate,
            received,
            total,
            progress,
        } => Json(ChunkResponse {
            success: true,
            duplicate,
            chunk_index,
            received,
            total,
            progress,
        })
        .into_response(),
        ChunkOutcome::Finalized(outcome) => finalize_response(outcome),
    })
}

pub(crate) async fn complete(
    State(state): State<AppState>,
    Json(request): Json<LifecycleRequest>,
) -> Result<Response> {
    let outcome = state
        .coordinator
        .complete_upload(&request.email_id, &request.session_id)
        .await?;
    Ok(finalize_response(outcome))
}

pub(crate) async fn cancel(
    State(state): State<AppState>,
    Json(request): Json<LifecycleRequest>,
) -> Result<Response> {
    let outcome = state
        .coordinator
        .cancel_upload(&request.email_id, &request.session_id)
        .await?;
    let status = match outcome {
        CancelOutcome::Cancelled => "cancelled",
        CancelOutcome::NotFound => "not_found",
    };
    Ok(Json(CancelResponse { status }).into_response())
}

fn finalize_response(outcome: FinalizeOutcome) -> Response {
    match outcome {
        FinalizeOutcome::Completed(CompleteReceipt {
            object_key,
            total_size,
        }) => Json(CompletionResponse {
            success: true,
            completed: true,
            s3_key: object_key,
            file_size: total_size,
        })
        .into_response(),
        FinalizeOutcome::Finalizing => Json(FinalizingResponse {
            success: true,
            completed: false,
            status: "finalizing",
        })
        .into_response(),
    }
}
