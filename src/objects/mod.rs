//! Provides a simple abstraction over object storage services.
//!
//! The upload coordinator and streaming service only ever talk to the
//! [`ObjectStore`] trait; the S3 adapter in [`s3`] is the one production
//! backend.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::content_type;
use crate::errors::{KeyError, Result};

mod s3;
pub use s3::S3Config;
pub use s3::S3;

#[cfg(test)]
pub(crate) mod testing;

/// Used to communicate multipart upload information between [`ObjectStore`]
/// users and backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub e_tag: Option<String>,
    pub part_number: i32,
}

/// Metadata returned by [`ObjectStore::head`].
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub size: u64,
    pub content_type: Option<String>,
}

/// One entry in an [`ObjectStore::list_prefix`] result.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

pub type ObjectBody = BoxStream<'static, Result<Bytes>>;

static FILENAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9 ._()'-]+$").unwrap());

/// An object key of the form `{owner_id}/{YYYYMMDD_HHMMSS}/{filename}`.
///
/// The owner segment doubles as the authorization subject: every key a
/// caller may touch starts with their owner id and a `/`. Construction
/// rejects filenames that could escape that prefix (path separators,
/// relative segments, characters outside the S3-safe set).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key(String);

impl Key {
    /// Build the canonical key for a fresh upload.
    pub fn build(owner_id: &str, filename: &str, when: DateTime<Utc>) -> Result<Key> {
        if owner_id.is_empty() {
            return Err(KeyError::EmptyOwner.into());
        }
        if owner_id.contains('/') {
            return Err(KeyError::SlashInOwner.into());
        }
        if filename.is_empty() {
            return Err(KeyError::EmptyFilename.into());
        }
        if filename == "." || filename == ".." || !FILENAME_RE.is_match(filename) {
            return Err(
                KeyError::FilenameMustMatchRegex(FILENAME_RE.as_str().to_string()).into(),
            );
        }
        Ok(Key(format!(
            "{}/{}/{}",
            owner_id,
            when.format("%Y%m%d_%H%M%S"),
            filename
        )))
    }

    /// Validate a client-provided key, e.g. the `s3_key` named in a
    /// streaming-token request.
    pub fn parse(s: &str) -> Result<Key> {
        if s.is_empty() {
            return Err(KeyError::EmptyKey.into());
        }
        if s.starts_with('/') {
            return Err(KeyError::RootedKey.into());
        }
        if s.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(KeyError::RelativeSegment.into());
        }
        Ok(Key(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the key sits under `owner_id + "/"`.
    pub fn owned_by(&self, owner_id: &str) -> bool {
        !owner_id.is_empty()
            && self.0.len() > owner_id.len()
            && self.0.as_bytes()[owner_id.len()] == b'/'
            && self.0.starts_with(owner_id)
    }

    /// Final path segment, used for `Content-Disposition` filenames.
    pub fn basename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provides a common interface for interacting with different kinds of
/// backend object stores.
///
/// Object retrieval methods return [`futures::stream::Stream`]s over
/// [`bytes::Bytes`]; upload methods take fully buffered chunks, since a
/// chunk is never larger than the configured chunk-size ceiling.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Create the configured bucket if it does not exist yet.
    async fn ensure_bucket(&self) -> Result<()>;

    /// Start a multipart upload and return the backend's upload id.
    async fn initiate_multipart(&self, key: &Key, content_type: &str) -> Result<String>;

    /// Upload one part for the given upload id.
    async fn upload_part(
        &self,
        key: &Key,
        upload_id: &str,
        part_number: i32,
        bytes: Bytes,
    ) -> Result<Part>;

    /// Finalize the multipart upload. `parts` must be sorted by ascending
    /// part number.
    async fn complete_multipart(&self, key: &Key, upload_id: &str, parts: Vec<Part>)
        -> Result<()>;

    /// Abort the multipart upload without finalizing it.
    async fn abort_multipart(&self, key: &Key, upload_id: &str) -> Result<()>;

    /// Return size and stored content type, or `None` for a missing key.
    async fn head(&self, key: &Key) -> Result<Option<ObjectMeta>>;

    /// Get the whole contents of the referenced key.
    async fn get(&self, key: &Key) -> Result<ObjectBody>;

    /// Get bytes `[start..=end]` of the referenced key.
    async fn get_range(&self, key: &Key, start: u64, end: u64) -> Result<ObjectBody>;

    /// List all keys under the given prefix.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectEntry>>;
}

/// Resolve the content type served for an object: prefer what the store
/// recorded, fall back to the extension allowlist, then octet-stream.
pub fn resolve_content_type(key: &Key, meta: &ObjectMeta) -> String {
    match &meta.content_type {
        Some(ct) if !ct.is_empty() => ct.clone(),
        _ => content_type::for_filename(key.basename())
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}
