//! In-memory [`ObjectStore`] used by the coordinator and streaming tests.
//!
//! Counts multipart calls so tests can assert the idempotency laws: one
//! `upload_part` per distinct chunk, one `complete_multipart` per session.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use sha2::{Digest, Sha256};

use super::{Key, ObjectBody, ObjectEntry, ObjectMeta, ObjectStore, Part};
use crate::errors::{Error, Result};

pub(crate) struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
}

struct MultipartState {
    key: String,
    content_type: String,
    parts: BTreeMap<i32, (String, Vec<u8>)>,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, MultipartState>>,
    next_upload: AtomicUsize,
    fail_completes: AtomicUsize,
    pub upload_part_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Make the next `n` complete_multipart calls fail.
    pub fn fail_next_completes(&self, n: usize) {
        self.fail_completes.store(n, Ordering::SeqCst);
    }

    pub fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.map(String::from),
                last_modified: Utc::now(),
            },
        );
    }

    pub fn object_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.bytes.clone())
    }

    pub fn live_upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn upload_parts(&self) -> usize {
        self.upload_part_calls.load(Ordering::SeqCst)
    }

    pub fn completes(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.abort_calls.load(Ordering::SeqCst)
    }
}

fn body_from(bytes: Vec<u8>) -> ObjectBody {
    futures::stream::iter(std::iter::once(Ok(Bytes::from(bytes)))).boxed()
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn ensure_bucket(&self) -> Result<()> {
        Ok(())
    }

    async fn initiate_multipart(&self, key: &Key, content_type: &str) -> Result<String> {
        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.uploads.lock().unwrap().insert(
            upload_id.clone(),
            MultipartState {
                key: key.as_str().to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &Key,
        upload_id: &str,
        part_number: i32,
        bytes: Bytes,
    ) -> Result<Part> {
        self.upload_part_calls.fetch_add(1, Ordering::SeqCst);
        let e_tag = format!("\"{}\"", hex::encode(&Sha256::digest(&bytes)[..8]));
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or(Error::StoreUnavailable("unknown upload id"))?;
        upload
            .parts
            .insert(part_number, (e_tag.clone(), bytes.to_vec()));
        Ok(Part {
            e_tag: Some(e_tag),
            part_number,
        })
    }

    async fn complete_multipart(
        &self,
        _key: &Key,
        upload_id: &str,
        parts: Vec<Part>,
    ) -> Result<()> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_completes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::StoreUnavailable("injected complete failure"));
        }

        let upload = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or(Error::StoreUnavailable("unknown upload id"))?;

        // the real S3 API rejects part lists that are not strictly ascending
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(Error::StoreUnavailable("parts out of order"));
        }

        let mut bytes = Vec::new();
        for part in &parts {
            let (e_tag, data) = upload
                .parts
                .get(&part.part_number)
                .ok_or(Error::StoreUnavailable("unknown part number"))?;
            if part.e_tag.as_deref() != Some(e_tag.as_str()) {
                return Err(Error::StoreUnavailable("etag mismatch"));
            }
            bytes.extend_from_slice(data);
        }

        self.objects.lock().unwrap().insert(
            upload.key,
            StoredObject {
                bytes,
                content_type: Some(upload.content_type),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn abort_multipart(&self, _key: &Key, upload_id: &str) -> Result<()> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }

    async fn head(&self, key: &Key) -> Result<Option<ObjectMeta>> {
        Ok(self.objects.lock().unwrap().get(key.as_str()).map(|o| {
            ObjectMeta {
                size: o.bytes.len() as u64,
                content_type: o.content_type.clone(),
            }
        }))
    }

    async fn get(&self, key: &Key) -> Result<ObjectBody> {
        let bytes = self
            .object_bytes(key.as_str())
            .ok_or(Error::ObjectNotFound)?;
        Ok(body_from(bytes))
    }

    async fn get_range(&self, key: &Key, start: u64, end: u64) -> Result<ObjectBody> {
        let bytes = self
            .object_bytes(key.as_str())
            .ok_or(Error::ObjectNotFound)?;
        let end = (end as usize).min(bytes.len().saturating_sub(1));
        Ok(body_from(bytes[start as usize..=end].to_vec()))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let objects = self.objects.lock().unwrap();
        let mut entries: Vec<ObjectEntry> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, o)| ObjectEntry {
                key: key.clone(),
                size: o.bytes.len() as u64,
                last_modified: Some(o.last_modified),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

/// Collect an [`ObjectBody`] into contiguous bytes.
pub(crate) async fn collect_body(mut body: ObjectBody) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}
