//! Token-gated ranged reads of stored objects.

use std::sync::Arc;

use chrono::Utc;

use crate::errors::{Error, Result};
use crate::objects::{resolve_content_type, Key, ObjectBody, ObjectStore};

mod tokens;
pub use tokens::StreamToken;
pub use tokens::StreamTokenCache;
pub use tokens::{STREAM_TOKEN_TTL_SECS, TOKEN_SWEEP_PERIOD};

/// A client's `Range: bytes=a-b` request; `end` is absent for open-ended
/// ranges (`bytes=a-`).
#[derive(Debug, Clone, Copy)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

/// Everything the HTTP layer needs to answer a stream request.
pub struct StreamReply {
    pub body: ObjectBody,
    /// Total object size, for `Content-Range` and `Content-Length`.
    pub size: u64,
    pub content_type: String,
    /// Basename for the inline `Content-Disposition`.
    pub filename: String,
    /// The satisfied range, when the request carried one.
    pub range: Option<(u64, u64)>,
}

pub struct StreamingService {
    store: Arc<dyn ObjectStore>,
    tokens: Arc<StreamTokenCache>,
}

impl StreamingService {
    pub fn new(store: Arc<dyn ObjectStore>, tokens: Arc<StreamTokenCache>) -> StreamingService {
        StreamingService { store, tokens }
    }

    /// Issue a token scoped to an object the caller owns.
    pub fn mint_token(&self, owner_id: &str, object_key: &str) -> Result<StreamToken> {
        let key = Key::parse(object_key)?;
        if !key.owned_by(owner_id) {
            return Err(Error::OwnerMismatch);
        }
        let token = self.tokens.mint(owner_id, key);
        tracing::debug!(owner = owner_id, key = object_key, "minted streaming token");
        Ok(token)
    }

    /// Serve an authorized read: resolve the token, then hand back either
    /// the whole object or the clamped requested range.
    pub async fn stream(&self, token: &str, range: Option<RangeSpec>) -> Result<StreamReply> {
        let token = self
            .tokens
            .lookup(token, Utc::now())
            .ok_or(Error::TokenInvalid)?;
        if !token.object_key.owned_by(&token.owner_id) {
            return Err(Error::TokenInvalid);
        }

        let meta = self
            .store
            .head(&token.object_key)
            .await?
            .ok_or(Error::ObjectNotFound)?;
        let content_type = resolve_content_type(&token.object_key, &meta);
        let filename = token.object_key.basename().to_string();

        match range {
            Some(range) => {
                if range.start >= meta.size {
                    return Err(Error::RangeNotSatisfiable);
                }
                let end = match range.end {
                    Some(end) if end < meta.size => end,
                    _ => meta.size - 1,
                };
                if end < range.start {
                    return Err(Error::RangeNotSatisfiable);
                }
                let body = self
                    .store
                    .get_range(&token.object_key, range.start, end)
                    .await?;
                Ok(StreamReply {
                    body,
                    size: meta.size,
                    content_type,
                    filename,
                    range: Some((range.start, end)),
                })
            }
            None => Ok(StreamReply {
                body: self.store.get(&token.object_key).await?,
                size: meta.size,
                content_type,
                filename,
                range: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::testing::{collect_body, MemoryStore};

    const KEY: &str = "alice@x/20240309_173005/clip.mp4";
    const SIZE: usize = 256 * 1024;

    fn object() -> Vec<u8> {
        (0..SIZE).map(|i| (i % 251) as u8).collect()
    }

    fn setup() -> (Arc<MemoryStore>, Arc<StreamTokenCache>, StreamingService) {
        let store = Arc::new(MemoryStore::new());
        store.put_object(KEY, object(), Some("video/mp4"));
        let tokens = Arc::new(StreamTokenCache::new());
        let service = StreamingService::new(store.clone(), tokens.clone());
        (store, tokens, service)
    }

    #[test]
    fn mint_rejects_foreign_keys() {
        let (_, _, service) = setup();
        assert!(matches!(
            service.mint_token("bob@x", KEY),
            Err(Error::OwnerMismatch)
        ));
        // a prefix of the owner segment is not ownership
        assert!(matches!(
            service.mint_token("alice", KEY),
            Err(Error::OwnerMismatch)
        ));
        assert!(service.mint_token("alice@x", KEY).is_ok());
    }

    #[tokio::test]
    async fn whole_object_stream() {
        let (_, _, service) = setup();
        let token = service.mint_token("alice@x", KEY).unwrap();
        let reply = service.stream(&token.token, None).await.unwrap();
        assert_eq!(reply.size, SIZE as u64);
        assert_eq!(reply.content_type, "video/mp4");
        assert_eq!(reply.filename, "clip.mp4");
        assert!(reply.range.is_none());
        assert_eq!(collect_body(reply.body).await, object());
    }

    #[tokio::test]
    async fn bounded_range_returns_exact_slice() {
        let (_, _, service) = setup();
        let token = service.mint_token("alice@x", KEY).unwrap();
        let reply = service
            .stream(
                &token.token,
                Some(RangeSpec {
                    start: 0,
                    end: Some(1023),
                }),
            )
            .await
            .unwrap();
        assert_eq!(reply.range, Some((0, 1023)));
        let bytes = collect_body(reply.body).await;
        assert_eq!(bytes.len(), 1024);
        assert_eq!(bytes, object()[..1024].to_vec());
    }

    #[tokio::test]
    async fn contiguous_ranges_reconstruct_the_object() {
        let (_, _, service) = setup();
        let token = service.mint_token("alice@x", KEY).unwrap();

        let head = service
            .stream(
                &token.token,
                Some(RangeSpec {
                    start: 0,
                    end: Some(1023),
                }),
            )
            .await
            .unwrap();
        // open-ended tail: bytes=1024-
        let tail = service
            .stream(
                &token.token,
                Some(RangeSpec {
                    start: 1024,
                    end: None,
                }),
            )
            .await
            .unwrap();
        assert_eq!(tail.range, Some((1024, SIZE as u64 - 1)));

        let mut assembled = collect_body(head.body).await;
        assembled.extend(collect_body(tail.body).await);
        assert_eq!(assembled, object());
    }

    #[tokio::test]
    async fn range_end_past_object_size_is_clamped() {
        let (_, _, service) = setup();
        let token = service.mint_token("alice@x", KEY).unwrap();
        let reply = service
            .stream(
                &token.token,
                Some(RangeSpec {
                    start: 100,
                    end: Some(u64::MAX),
                }),
            )
            .await
            .unwrap();
        assert_eq!(reply.range, Some((100, SIZE as u64 - 1)));
    }

    #[tokio::test]
    async fn range_start_past_object_size_is_unsatisfiable() {
        let (_, _, service) = setup();
        let token = service.mint_token("alice@x", KEY).unwrap();
        let result = service
            .stream(
                &token.token,
                Some(RangeSpec {
                    start: SIZE as u64,
                    end: None,
                }),
            )
            .await;
        assert!(matches!(result, Err(Error::RangeNotSatisfiable)));
    }

    #[tokio::test]
    async fn expired_or_unknown_tokens_are_rejected() {
        let (_, tokens, service) = setup();
        assert!(matches!(
            service.stream("deadbeef", None).await,
            Err(Error::TokenInvalid)
        ));

        let token = service.mint_token("alice@x", KEY).unwrap();
        tokens.expire(&token.token, Utc::now() - chrono::Duration::seconds(1));
        assert!(matches!(
            service.stream(&token.token, None).await,
            Err(Error::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_, _, service) = setup();
        let gone = "alice@x/20240309_173005/gone.mp4";
        let token = service.mint_token("alice@x", gone).unwrap();
        assert!(matches!(
            service.stream(&token.token, None).await,
            Err(Error::ObjectNotFound)
        ));
    }

    #[tokio::test]
    async fn content_type_falls_back_to_the_extension() {
        let (store, _, service) = setup();
        let untyped = "alice@x/20240309_173005/other.mp3";
        store.put_object(untyped, vec![1, 2, 3], None);
        let token = service.mint_token("alice@x", untyped).unwrap();
        let reply = service.stream(&token.token, None).await.unwrap();
        assert_eq!(reply.content_type, "audio/mpeg");
    }
}
