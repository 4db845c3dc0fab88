//! Per-file upload session state.
//!
//! A session maps one client file onto one object-store multipart upload.
//! All mutable state sits behind a single mutex which is never held across
//! store I/O: handlers ask for admission, do the I/O unlocked, then commit.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::errors::{Error, Result};
use crate::objects::{Key, Part};

pub const MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
pub const MAX_CHUNK_SIZE: u64 = 100 * 1024 * 1024;
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Idle time after which a live session is reaped.
pub(crate) const SESSION_IDLE_TIMEOUT_SECS: i64 = 2 * 60 * 60;
/// Completed and cancelled sessions linger briefly so replays can be echoed.
pub(crate) const TERMINAL_LINGER_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initialized,
    Uploading,
    Finalizing,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn accepts_chunks(&self) -> bool {
        matches!(self, SessionState::Initialized | SessionState::Uploading)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// Bookkeeping for one received chunk. Immutable once inserted.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    pub size: u64,
    pub sha256_hex: String,
    pub part_number: i32,
    pub e_tag: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

struct SessionCell {
    state: SessionState,
    received: HashMap<u32, ChunkInfo>,
    // indices whose upload_part is currently in flight, with the hash the
    // uploading request computed; a concurrent retry with an equal hash is
    // acked as a duplicate without touching the store
    in_flight: HashMap<u32, String>,
    completed_parts: Vec<Part>,
    updated_at: DateTime<Utc>,
}

pub struct UploadSession {
    pub session_id: String,
    pub owner_id: String,
    pub filename: String,
    pub content_type: &'static str,
    pub object_key: Key,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub multipart_upload_id: String,
    pub created_at: DateTime<Utc>,
    cell: Mutex<SessionCell>,
}

/// Verdict of the pre-upload admission check for one chunk index.
#[derive(Debug)]
pub(crate) enum ChunkAdmission {
    /// The caller must upload the part, then commit or abandon.
    Admit,
    /// Same index, same hash: ack without store I/O.
    Duplicate { received: u32 },
}

/// Verdict of the finalize CAS.
#[derive(Debug)]
pub(crate) enum FinalizeAdmission {
    /// Already completed; echo the cached result.
    Completed,
    /// Another finalize holds the CAS; do not re-issue store calls.
    InFlight,
    /// This caller won the CAS; complete the upload with these parts,
    /// already sorted by part number.
    Proceed(Vec<Part>),
}

impl UploadSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        owner_id: String,
        filename: String,
        content_type: &'static str,
        object_key: Key,
        total_size: u64,
        chunk_size: u64,
        total_chunks: u32,
        multipart_upload_id: String,
    ) -> UploadSession {
        let now = Utc::now();
        UploadSession {
            session_id,
            owner_id,
            filename,
            content_type,
            object_key,
            total_size,
            chunk_size,
            total_chunks,
            multipart_upload_id,
            created_at: now,
            cell: Mutex::new(SessionCell {
                state: SessionState::Initialized,
                received: HashMap::new(),
                in_flight: HashMap::new(),
                completed_parts: Vec::new(),
                updated_at: now,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.cell.lock().unwrap().state
    }

    pub fn received_count(&self) -> u32 {
        self.cell.lock().unwrap().received.len() as u32
    }

    /// Decide what to do with an incoming chunk before any store I/O.
    pub(crate) fn begin_chunk(&self, index: u32, sha256_hex: &str) -> Result<ChunkAdmission> {
        let mut cell = self.cell.lock().unwrap();

        if let Some(existing) = cell.received.get(&index) {
            if existing.sha256_hex == sha256_hex {
                return Ok(ChunkAdmission::Duplicate {
                    received: cell.received.len() as u32,
                });
            }
            return Err(Error::HashMismatch(index));
        }

        if let Some(pending) = cell.in_flight.get(&index) {
            if pending == sha256_hex {
                return Ok(ChunkAdmission::Duplicate {
                    received: cell.received.len() as u32,
                });
            }
            return Err(Error::HashMismatch(index));
        }

        match cell.state {
            state if state.accepts_chunks() => {}
            SessionState::Finalizing => {
                return Err(Error::InvalidRequest("upload session is finalizing"))
            }
            _ => return Err(Error::InvalidRequest("upload session no longer accepts chunks")),
        }

        cell.in_flight.insert(index, sha256_hex.to_string());
        Ok(ChunkAdmission::Admit)
    }

    /// Record a successfully uploaded part. Returns the received count.
    pub(crate) fn commit_chunk(&self, index: u32, info: ChunkInfo, part: Part) -> u32 {
        let mut cell = self.cell.lock().unwrap();
        cell.in_flight.remove(&index);
        cell.received.insert(index, info);
        cell.completed_parts.push(part);
        if cell.state == SessionState::Initialized {
            cell.state = SessionState::Uploading;
        }
        cell.updated_at = Utc::now();
        cell.received.len() as u32
    }

    /// Drop the in-flight reservation after a failed upload so the client
    /// can retry the chunk.
    pub(crate) fn abandon_chunk(&self, index: u32) {
        let mut cell = self.cell.lock().unwrap();
        cell.in_flight.remove(&index);
        cell.updated_at = Utc::now();
    }

    /// CAS into `finalizing`; at most one caller proceeds at a time.
    pub(crate) fn begin_finalize(&self) -> Result<FinalizeAdmission> {
        let mut cell = self.cell.lock().unwrap();
        match cell.state {
            SessionState::Completed => Ok(FinalizeAdmission::Completed),
            SessionState::Finalizing => Ok(FinalizeAdmission::InFlight),
            SessionState::Initialized | SessionState::Uploading => {
                cell.state = SessionState::Finalizing;
                cell.updated_at = Utc::now();
                let mut parts = cell.completed_parts.clone();
                parts.sort_by_key(|p| p.part_number);
                Ok(FinalizeAdmission::Proceed(parts))
            }
            _ => Err(Error::InvalidRequest("upload session is not finalizable")),
        }
    }

    pub(crate) fn complete_finalize(&self) {
        let mut cell = self.cell.lock().unwrap();
        cell.state = SessionState::Completed;
        cell.updated_at = Utc::now();
    }

    /// Revert to `initialized` after a failed completion so the client may
    /// retry.
    pub(crate) fn fail_finalize(&self) {
        let mut cell = self.cell.lock().unwrap();
        cell.state = SessionState::Initialized;
        cell.updated_at = Utc::now();
    }

    /// Flip into `cancelled`. Returns false when the session was already
    /// terminal, so exactly one caller performs the store abort.
    pub(crate) fn mark_cancelled(&self) -> bool {
        let mut cell = self.cell.lock().unwrap();
        if cell.state.is_terminal() {
            return false;
        }
        cell.state = SessionState::Cancelled;
        cell.updated_at = Utc::now();
        true
    }

    /// Janitor predicate: idle past the timeout, with a shorter linger for
    /// terminal sessions kept around only for idempotent replays.
    pub(crate) fn expired_at(&self, now: DateTime<Utc>) -> bool {
        let cell = self.cell.lock().unwrap();
        let idle = now - cell.updated_at;
        if cell.state.is_terminal() {
            idle > Duration::seconds(TERMINAL_LINGER_SECS)
        } else {
            idle > Duration::seconds(SESSION_IDLE_TIMEOUT_SECS)
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, updated_at: DateTime<Utc>) {
        self.cell.lock().unwrap().updated_at = updated_at;
    }
}

/// Validate the size geometry declared at init time.
pub(crate) fn validate_geometry(total_size: u64, total_chunks: u32, chunk_size: u64) -> Result<()> {
    if total_chunks < 1 {
        return Err(Error::InvalidRequest("total_chunks must be at least 1"));
    }
    if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
        return Err(Error::InvalidChunkSize(chunk_size));
    }
    if total_size > MAX_FILE_SIZE {
        return Err(Error::OversizeFile(total_size));
    }
    let chunks = total_chunks as u64;
    if chunks * chunk_size < total_size || total_size <= (chunks - 1) * chunk_size {
        return Err(Error::InvalidRequest(
            "file size does not fit the declared chunk layout",
        ));
    }
    Ok(())
}

/// Upload progress as a percentage, truncated to one decimal place.
pub(crate) fn progress_percent(received: u32, total: u32) -> f64 {
    ((received as f64 / total as f64) * 1000.0).floor() / 10.0
}
