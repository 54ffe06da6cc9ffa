//! The object-storage capability consumed by the bucket layer.
//!
//! [`ObjectStorage`] is the raw, S3-shaped surface: whole-body puts, the
//! multipart protocol, gets, heads, copies, deletes and paged listings. It
//! applies no existence preconditions; `BucketInternal` and `Bucket` build
//! those on top.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::{io, pin::Pin};
use thiserror::Error;

use crate::models::metadata::Record;

pub mod local;
pub mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// One-shot stream of object bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("multipart upload `{upload_id}` not found")]
    NoSuchUpload { upload_id: String },
    #[error("part {part_number} of upload `{upload_id}` is invalid: {reason}")]
    InvalidPart {
        upload_id: String,
        part_number: u32,
        reason: String,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl StorageError {
    /// The "not found" signal the existence probe maps to `false`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// What the capability knows about a stored object.
#[derive(Serialize, Clone, Debug)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: Record,
}

/// A part accepted by [`ObjectStorage::upload_part`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// One page of a key listing.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Present when more keys follow; pass it back to fetch the next page.
    pub next_continuation_token: Option<String>,
}

/// Raw storage operations, scoped by bucket name.
///
/// Implementations must be safe for concurrent use; the bucket layer shares a
/// single handle across all in-flight requests.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store the whole body under `key`, replacing any existing object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        metadata: &Record,
    ) -> StorageResult<ObjectInfo>;

    /// Open a multipart session and return its upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &Record,
    ) -> StorageResult<String>;

    /// Stage one part (numbers start at 1). Returns the part's ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String>;

    /// Assemble the listed parts, in order, into the final object.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<ObjectInfo>;

    /// Drop a session and every staged part.
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()>;

    async fn get_object(&self, bucket: &str, key: &str)
    -> StorageResult<(ObjectInfo, ByteStream)>;

    /// Metadata-only fetch. Fails with [`StorageError::NotFound`] when absent.
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Server-side copy; body and metadata are duplicated.
    async fn copy_object(&self, bucket: &str, src_key: &str, dst_key: &str)
    -> StorageResult<ObjectInfo>;

    /// Keys in lexicographic order, at most `max_keys` per page.
    async fn list_objects(
        &self,
        bucket: &str,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> StorageResult<ListPage>;
}

/// ETag of a single-part body: lowercase MD5 hex.
pub(crate) fn etag_of(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// ETag of an assembled multipart object: MD5 over the concatenated part
/// digests, suffixed with the part count.
pub(crate) fn multipart_etag(part_etags: &[String]) -> String {
    let mut ctx = md5::Context::new();
    for etag in part_etags {
        let raw = hex::decode(etag).unwrap_or_else(|_| etag.as_bytes().to_vec());
        ctx.consume(raw);
    }
    format!("{:x}-{}", ctx.compute(), part_etags.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_is_md5_hex() {
        assert_eq!(etag_of(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn multipart_etag_carries_part_count() {
        let parts = vec![etag_of(b"one"), etag_of(b"two")];
        let etag = multipart_etag(&parts);
        assert!(etag.ends_with("-2"));
        assert_eq!(etag.len(), 32 + 2);
    }

    #[test]
    fn multipart_etag_accepts_non_hex_part_etags() {
        let etag = multipart_etag(&["aéb".to_string(), "xyz".to_string()]);
        assert!(etag.ends_with("-2"));

        let mut ctx = md5::Context::new();
        ctx.consume("aéb".as_bytes());
        ctx.consume(b"xyz");
        assert_eq!(etag, format!("{:x}-2", ctx.compute()));
    }

    #[test]
    fn only_not_found_counts_as_absence() {
        let missing = StorageError::NotFound {
            bucket: "media".into(),
            key: "a".into(),
        };
        assert!(missing.is_not_found());
        assert!(!StorageError::BucketNotFound("media".into()).is_not_found());
        assert!(!StorageError::Io(io::Error::other("boom")).is_not_found());
    }
}
