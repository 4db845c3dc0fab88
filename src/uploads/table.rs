//! Concurrent registry of live upload sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::session::UploadSession;
use super::SessionState;
use crate::errors::{Error, Result};
use crate::janitor::Sweep;
use crate::objects::ObjectStore;

pub const SESSION_SWEEP_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Maps session id to [`UploadSession`]. The lock is only ever held for map
/// operations, never across store I/O.
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, Arc<UploadSession>>>,
}

impl SessionTable {
    pub fn new() -> SessionTable {
        SessionTable::default()
    }

    pub fn create(&self, session: Arc<UploadSession>) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(&session.session_id) {
            return Err(Error::InvalidRequest("session id collision"));
        }
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<UploadSession>> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<UploadSession>> {
        self.sessions.write().unwrap().remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every session past its idle timeout.
    pub(crate) fn sweep_expired(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<Arc<UploadSession>> {
        let mut sessions = self.sessions.write().unwrap();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.expired_at(now))
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| sessions.remove(id))
            .collect()
    }
}

/// Periodic sweeper that reaps idle sessions and aborts their multipart
/// uploads best-effort.
pub struct SessionJanitor {
    table: Arc<SessionTable>,
    store: Arc<dyn ObjectStore>,
}

impl SessionJanitor {
    pub fn new(table: Arc<SessionTable>, store: Arc<dyn ObjectStore>) -> SessionJanitor {
        SessionJanitor { table, store }
    }
}

#[async_trait]
impl Sweep for SessionJanitor {
    async fn sweep(&self) {
        let expired = self.table.sweep_expired(Utc::now());
        for session in expired {
            tracing::debug!(
                session_id = %session.session_id,
                state = ?session.state(),
                "expiring idle upload session"
            );
            if session.state() == SessionState::Completed {
                continue;
            }
            if let Err(e) = self
                .store
                .abort_multipart(&session.object_key, &session.multipart_upload_id)
                .await
            {
                tracing::warn!(
                    session_id = %session.session_id,
                    "failed to abort multipart upload for expired session: {e:?}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::super::session::{
        SESSION_IDLE_TIMEOUT_SECS, TERMINAL_LINGER_SECS,
    };
    use super::*;
    use crate::objects::testing::MemoryStore;
    use crate::objects::Key;

    fn session(id: &str) -> Arc<UploadSession> {
        Arc::new(UploadSession::new(
            id.into(),
            "alice@x".into(),
            "clip.mp4".into(),
            "video/mp4",
            Key::parse("alice@x/20240309_173005/clip.mp4").unwrap(),
            12_500_000,
            super::super::MIN_CHUNK_SIZE,
            3,
            "upload-0".into(),
        ))
    }

    #[test]
    fn create_get_remove() {
        let table = SessionTable::new();
        table.create(session("s-1")).unwrap();
        assert!(table.get("s-1").is_some());
        assert!(table.get("s-2").is_none());
        assert!(table.remove("s-1").is_some());
        assert!(table.remove("s-1").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn create_rejects_colliding_ids() {
        let table = SessionTable::new();
        table.create(session("s-1")).unwrap();
        assert!(table.create(session("s-1")).is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn sweep_only_removes_expired_sessions() {
        let table = SessionTable::new();
        let now = Utc::now();

        let fresh = session("fresh");
        let stale = session("stale");
        stale.backdate(now - ChronoDuration::seconds(SESSION_IDLE_TIMEOUT_SECS + 1));
        table.create(fresh).unwrap();
        table.create(stale).unwrap();

        let expired = table.sweep_expired(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].session_id, "stale");
        assert!(table.get("fresh").is_some());
        assert!(table.get("stale").is_none());
    }

    #[tokio::test]
    async fn janitor_aborts_reaped_live_sessions_but_not_completed_ones() {
        let table = Arc::new(SessionTable::new());
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let live = session("live");
        live.backdate(now - ChronoDuration::seconds(SESSION_IDLE_TIMEOUT_SECS + 60));
        table.create(live).unwrap();

        let done = session("done");
        done.begin_finalize().unwrap();
        done.complete_finalize();
        done.backdate(now - ChronoDuration::seconds(TERMINAL_LINGER_SECS + 60));
        table.create(done).unwrap();

        let janitor = SessionJanitor::new(table.clone(), store.clone());
        janitor.sweep().await;

        assert!(table.is_empty());
        assert_eq!(store.aborts(), 1);
    }
}
