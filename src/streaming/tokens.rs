//! Short-lived capability tokens for authorized streaming.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::janitor::Sweep;
use crate::objects::Key;

pub const STREAM_TOKEN_TTL_SECS: i64 = 5 * 60;
pub const TOKEN_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// A minted capability: whoever holds the token may read the named object
/// until it expires. Tokens are not single-use; several may coexist for the
/// same `(owner, key)` pair.
#[derive(Debug, Clone)]
pub struct StreamToken {
    pub token: String,
    pub owner_id: String,
    pub object_key: Key,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct StreamTokenCache {
    tokens: RwLock<HashMap<String, StreamToken>>,
}

impl StreamTokenCache {
    pub fn new() -> StreamTokenCache {
        StreamTokenCache::default()
    }

    /// Mint a fresh 256-bit token for the given owner/key pair.
    pub fn mint(&self, owner_id: &str, object_key: Key) -> StreamToken {
        let mut buf = [0u8; 32];
        OsRng.fill_bytes(&mut buf);
        let token = StreamToken {
            token: hex::encode(buf),
            owner_id: owner_id.to_string(),
            object_key,
            expires_at: Utc::now() + chrono::Duration::seconds(STREAM_TOKEN_TTL_SECS),
        };
        self.tokens
            .write()
            .unwrap()
            .insert(token.token.clone(), token.clone());
        token
    }

    /// Resolve a presented token. Expired entries are treated as missing;
    /// the sweeper removes them.
    pub fn lookup(&self, token: &str, now: DateTime<Utc>) -> Option<StreamToken> {
        self.tokens
            .read()
            .unwrap()
            .get(token)
            .filter(|entry| entry.expires_at > now)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.tokens.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn expire(&self, token: &str, expires_at: DateTime<Utc>) {
        if let Some(entry) = self.tokens.write().unwrap().get_mut(token) {
            entry.expires_at = expires_at;
        }
    }
}

#[async_trait]
impl Sweep for StreamTokenCache {
    async fn sweep(&self) {
        let now = Utc::now();
        let mut tokens = self.tokens.write().unwrap();
        let before = tokens.len();
        tokens.retain(|_, entry| entry.expires_at > now);
        let evicted = before - tokens.len();
        if evicted > 0 {
            tracing::debug!(evicted, "expired streaming tokens");
        }
    }
}
