//! Orchestrates the upload verbs on top of [`SessionTable`] and
//! [`ObjectStore`].
//!
//! The coordinator owns the request-level contract: ownership checks, the
//! check-first duplicate handling, and the finalize CAS. Store I/O always
//! happens outside the session mutex.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::session::{
    progress_percent, validate_geometry, ChunkAdmission, ChunkInfo, FinalizeAdmission,
    UploadSession,
};
use super::SessionTable;
use crate::content_type;
use crate::errors::{Error, Result};
use crate::objects::{Key, ObjectEntry, ObjectStore};

pub struct UploadCoordinator {
    sessions: Arc<SessionTable>,
    store: Arc<dyn ObjectStore>,
}

#[derive(Debug, Clone)]
pub struct InitReceipt {
    pub session_id: String,
    pub object_key: String,
    pub upload_id: String,
}

#[derive(Debug, Clone)]
pub struct CompleteReceipt {
    pub object_key: String,
    pub total_size: u64,
}

#[derive(Debug)]
pub enum FinalizeOutcome {
    Completed(CompleteReceipt),
    /// Another request holds the finalize CAS; no store call was issued.
    Finalizing,
}

#[derive(Debug)]
pub enum ChunkOutcome {
    Accepted {
        duplicate: bool,
        received: u32,
        total: u32,
        progress: f64,
    },
    Finalized(FinalizeOutcome),
}

#[derive(Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Unknown session ids are acked rather than rejected so cancel is
    /// safely retryable.
    NotFound,
}

impl UploadCoordinator {
    pub fn new(sessions: Arc<SessionTable>, store: Arc<dyn ObjectStore>) -> UploadCoordinator {
        UploadCoordinator { sessions, store }
    }

    /// Create a session and the backing multipart upload.
    pub async fn init_upload(
        &self,
        owner_id: &str,
        filename: &str,
        total_size: u64,
        total_chunks: u32,
        chunk_size: u64,
    ) -> Result<InitReceipt> {
        validate_geometry(total_size, total_chunks, chunk_size)?;
        let extension = content_type::extension_of(filename)
            .ok_or_else(|| Error::UnsupportedType(filename.to_string()))?;
        let content_type = content_type::for_extension(extension)
            .ok_or_else(|| Error::UnsupportedType(extension.to_string()))?;

        let object_key = Key::build(owner_id, filename, Utc::now())?;
        let upload_id = self
            .store
            .initiate_multipart(&object_key, content_type)
            .await?;

        let session = Arc::new(UploadSession::new(
            Uuid::new_v4().to_string(),
            owner_id.to_string(),
            filename.to_string(),
            content_type,
            object_key,
            total_size,
            chunk_size,
            total_chunks,
            upload_id,
        ));
        self.sessions.create(session.clone())?;

        tracing::info!(
            session_id = %session.session_id,
            key = %session.object_key,
            total_chunks,
            "initialized upload session"
        );

        Ok(InitReceipt {
            session_id: session.session_id.clone(),
            object_key: session.object_key.as_str().to_string(),
            upload_id: session.multipart_upload_id.clone(),
        })
    }

    /// Ingest one chunk. Duplicates (same index, same hash) are acked
    /// without touching the store; the part is uploaded only when the index
    /// was not seen before. The final chunk triggers completion inline.
    pub async fn upload_chunk(
        &self,
        owner_id: &str,
        session_id: &str,
        chunk_index: u32,
        bytes: Bytes,
    ) -> Result<ChunkOutcome> {
        let session = self.lookup(owner_id, session_id)?;
        if chunk_index >= session.total_chunks {
            return Err(Error::InvalidChunkIndex {
                index: chunk_index,
                total: session.total_chunks,
            });
        }
        if bytes.is_empty() {
            return Err(Error::InvalidRequest("chunk must not be empty"));
        }

        let sha256_hex = hex::encode(Sha256::digest(&bytes));
        match session.begin_chunk(chunk_index, &sha256_hex)? {
            ChunkAdmission::Duplicate { received } => {
                tracing::debug!(
                    session_id,
                    chunk_index,
                    "duplicate chunk acknowledged without store I/O"
                );
                return Ok(ChunkOutcome::Accepted {
                    duplicate: true,
                    received,
                    total: session.total_chunks,
                    progress: progress_percent(received, session.total_chunks),
                });
            }
            ChunkAdmission::Admit => {}
        }

        let part_number = chunk_index as i32 + 1;
        let size = bytes.len() as u64;
        let part = match self
            .store
            .upload_part(
                &session.object_key,
                &session.multipart_upload_id,
                part_number,
                bytes,
            )
            .await
        {
            Ok(part) => part,
            Err(e) => {
                session.abandon_chunk(chunk_index);
                return Err(e);
            }
        };

        let info = ChunkInfo {
            size,
            sha256_hex,
            part_number,
            e_tag: part.e_tag.clone(),
            uploaded_at: Utc::now(),
        };
        let received = session.commit_chunk(chunk_index, info, part);

        if received == session.total_chunks {
            return Ok(ChunkOutcome::Finalized(self.finalize(&session).await?));
        }

        Ok(ChunkOutcome::Accepted {
            duplicate: false,
            received,
            total: session.total_chunks,
            progress: progress_percent(received, session.total_chunks),
        })
    }

    /// Explicit completion endpoint. Rejects incomplete uploads; replays
    /// after success echo the original receipt.
    pub async fn complete_upload(
        &self,
        owner_id: &str,
        session_id: &str,
    ) -> Result<FinalizeOutcome> {
        let session = self.lookup(owner_id, session_id)?;
        let received = session.received_count();
        if received < session.total_chunks {
            return Err(Error::UploadIncomplete {
                received,
                total: session.total_chunks,
            });
        }
        self.finalize(&session).await
    }

    /// Cancel the session and abort the backing multipart upload
    /// best-effort. Unknown sessions are a non-error.
    pub async fn cancel_upload(&self, owner_id: &str, session_id: &str) -> Result<CancelOutcome> {
        let Some(session) = self.sessions.get(session_id) else {
            return Ok(CancelOutcome::NotFound);
        };
        if session.owner_id != owner_id {
            return Err(Error::OwnerMismatch);
        }

        let won = session.mark_cancelled();
        self.sessions.remove(session_id);
        if won {
            if let Err(e) = self
                .store
                .abort_multipart(&session.object_key, &session.multipart_upload_id)
                .await
            {
                tracing::warn!(session_id, "failed to abort multipart upload: {e:?}");
            }
            tracing::info!(session_id, key = %session.object_key, "cancelled upload session");
        }
        Ok(CancelOutcome::Cancelled)
    }

    /// List the caller's stored objects.
    pub async fn list_files(&self, owner_id: &str) -> Result<Vec<ObjectEntry>> {
        if owner_id.is_empty() {
            return Err(Error::InvalidRequest("email_id must not be empty"));
        }
        self.store.list_prefix(&format!("{owner_id}/")).await
    }

    async fn finalize(&self, session: &Arc<UploadSession>) -> Result<FinalizeOutcome> {
        let parts = match session.begin_finalize()? {
            FinalizeAdmission::Completed => {
                return Ok(FinalizeOutcome::Completed(self.receipt(session)))
            }
            FinalizeAdmission::InFlight => return Ok(FinalizeOutcome::Finalizing),
            FinalizeAdmission::Proceed(parts) => parts,
        };

        match self
            .store
            .complete_multipart(&session.object_key, &session.multipart_upload_id, parts)
            .await
        {
            Ok(()) => {
                session.complete_finalize();
                tracing::info!(
                    session_id = %session.session_id,
                    key = %session.object_key,
                    size = session.total_size,
                    "completed upload"
                );
                Ok(FinalizeOutcome::Completed(self.receipt(session)))
            }
            Err(e) => {
                session.fail_finalize();
                tracing::warn!(
                    session_id = %session.session_id,
                    "multipart completion failed, session reverted for retry: {e:?}"
                );
                Err(e)
            }
        }
    }

    fn receipt(&self, session: &UploadSession) -> CompleteReceipt {
        CompleteReceipt {
            object_key: session.object_key.as_str().to_string(),
            total_size: session.total_size,
        }
    }

    fn lookup(&self, owner_id: &str, session_id: &str) -> Result<Arc<UploadSession>> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::InvalidSession(session_id.to_string()))?;
        if session.owner_id != owner_id {
            return Err(Error::OwnerMismatch);
        }
        Ok(session)
    }
}
