//! In-process implementation of [`ObjectStorage`].
//!
//! Objects live in per-bucket ordered maps behind a `tokio::sync::RwLock`.
//! Used by the `memory` backend and throughout the test suite.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{TryStreamExt, stream};
use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    ByteStream, CompletedPart, ListPage, ObjectInfo, ObjectStorage, StorageError, StorageResult,
    etag_of, multipart_etag,
};
use crate::models::metadata::Record;

const DEFAULT_PAGE_SIZE: usize = 1000;

struct StoredObject {
    data: Bytes,
    info: ObjectInfo,
}

struct PendingUpload {
    bucket: String,
    key: String,
    metadata: Record,
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Default)]
struct State {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    uploads: HashMap<String, PendingUpload>,
}

#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
    page_size: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty bucket.
    pub fn with_bucket(mut self, name: impl Into<String>) -> Self {
        self.state
            .get_mut()
            .buckets
            .entry(name.into())
            .or_default();
        self
    }

    /// Cap listing pages below the requested `max_keys`.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Register a bucket on a shared handle. Existing buckets are kept.
    pub async fn create_bucket(&self, name: &str) {
        self.state
            .write()
            .await
            .buckets
            .entry(name.to_string())
            .or_default();
    }

    /// Number of multipart sessions still open.
    pub async fn pending_uploads(&self) -> usize {
        self.state.read().await.uploads.len()
    }

    fn store(
        objects: &mut BTreeMap<String, StoredObject>,
        key: &str,
        data: Bytes,
        etag: String,
        metadata: Record,
    ) -> ObjectInfo {
        let info = ObjectInfo {
            key: key.to_string(),
            size: data.len() as u64,
            etag,
            last_modified: Utc::now(),
            metadata,
        };
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                info: info.clone(),
            },
        );
        info
    }
}

fn bucket_mut<'a>(
    state: &'a mut State,
    bucket: &str,
) -> StorageResult<&'a mut BTreeMap<String, StoredObject>> {
    state
        .buckets
        .get_mut(bucket)
        .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))
}

fn bucket_ref<'a>(
    state: &'a State,
    bucket: &str,
) -> StorageResult<&'a BTreeMap<String, StoredObject>> {
    state
        .buckets
        .get(bucket)
        .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))
}

fn not_found(bucket: &str, key: &str) -> StorageError {
    StorageError::NotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        metadata: &Record,
    ) -> StorageResult<ObjectInfo> {
        let data = body
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?
            .freeze();

        let mut state = self.state.write().await;
        let objects = bucket_mut(&mut state, bucket)?;
        let etag = etag_of(&data);
        debug!("memory put {}/{} ({} bytes)", bucket, key, data.len());
        Ok(Self::store(objects, key, data, etag, metadata.clone()))
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &Record,
    ) -> StorageResult<String> {
        let mut state = self.state.write().await;
        bucket_ref(&state, bucket)?;
        let upload_id = Uuid::new_v4().to_string();
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                metadata: metadata.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        if part_number == 0 {
            return Err(StorageError::InvalidPart {
                upload_id: upload_id.to_string(),
                part_number,
                reason: "part numbers start at 1".into(),
            });
        }
        let mut state = self.state.write().await;
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| StorageError::NoSuchUpload {
                upload_id: upload_id.to_string(),
            })?;
        let etag = etag_of(&data);
        upload.parts.insert(part_number, (data, etag.clone()));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<ObjectInfo> {
        let mut state = self.state.write().await;
        let upload = match state.uploads.get(upload_id) {
            Some(u) if u.bucket == bucket && u.key == key => u,
            _ => {
                return Err(StorageError::NoSuchUpload {
                    upload_id: upload_id.to_string(),
                });
            }
        };

        let mut body = BytesMut::new();
        let mut etags = Vec::with_capacity(parts.len());
        for part in parts {
            let (data, etag) =
                upload
                    .parts
                    .get(&part.part_number)
                    .ok_or_else(|| StorageError::InvalidPart {
                        upload_id: upload_id.to_string(),
                        part_number: part.part_number,
                        reason: "part was never uploaded".into(),
                    })?;
            if *etag != part.etag {
                return Err(StorageError::InvalidPart {
                    upload_id: upload_id.to_string(),
                    part_number: part.part_number,
                    reason: "etag mismatch".into(),
                });
            }
            body.extend_from_slice(data);
            etags.push(etag.clone());
        }

        let metadata = upload.metadata.clone();
        state.uploads.remove(upload_id);
        let objects = bucket_mut(&mut state, bucket)?;
        Ok(Self::store(
            objects,
            key,
            body.freeze(),
            multipart_etag(&etags),
            metadata,
        ))
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        self.state
            .write()
            .await
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NoSuchUpload {
                upload_id: upload_id.to_string(),
            })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(ObjectInfo, ByteStream)> {
        let state = self.state.read().await;
        let stored = bucket_ref(&state, bucket)?
            .get(key)
            .ok_or_else(|| not_found(bucket, key))?;
        let data = stored.data.clone();
        let body: ByteStream = Box::pin(stream::once(async move { Ok(data) }));
        Ok((stored.info.clone(), body))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        let state = self.state.read().await;
        bucket_ref(&state, bucket)?
            .get(key)
            .map(|stored| stored.info.clone())
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut state = self.state.write().await;
        bucket_mut(&mut state, bucket)?.remove(key);
        Ok(())
    }

    async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> StorageResult<ObjectInfo> {
        let mut state = self.state.write().await;
        let objects = bucket_mut(&mut state, bucket)?;
        let (data, etag, metadata) = {
            let src = objects
                .get(src_key)
                .ok_or_else(|| not_found(bucket, src_key))?;
            (
                src.data.clone(),
                src.info.etag.clone(),
                src.info.metadata.clone(),
            )
        };
        Ok(Self::store(objects, dst_key, data, etag, metadata))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> StorageResult<ListPage> {
        let state = self.state.read().await;
        let objects = bucket_ref(&state, bucket)?;
        let limit = self
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(max_keys.max(1));

        let lower = match continuation_token {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Unbounded,
        };
        let mut keys: Vec<String> = objects
            .range((lower, Bound::Unbounded))
            .map(|(k, _)| k.clone())
            .take(limit + 1)
            .collect();

        let next_continuation_token = if keys.len() > limit {
            keys.pop();
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage {
            keys,
            next_continuation_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(data: &'static [u8]) -> ByteStream {
        Box::pin(stream::once(async move { Ok(Bytes::from_static(data)) }))
    }

    async fn collect(body: ByteStream) -> Bytes {
        body.try_fold(BytesMut::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
        .unwrap()
        .freeze()
    }

    #[tokio::test]
    async fn put_then_get_returns_body_and_metadata() {
        let storage = MemoryStorage::new().with_bucket("media");
        let mut meta = Record::new();
        meta.insert("color".into(), "blue".into());
        storage
            .put_object("media", "a.txt", body(b"data"), &meta)
            .await
            .unwrap();

        let (info, stream) = storage.get_object("media", "a.txt").await.unwrap();
        assert_eq!(info.size, 4);
        assert_eq!(info.metadata.get("color").map(String::as_str), Some("blue"));
        assert_eq!(collect(stream).await, Bytes::from_static(b"data"));
    }

    #[tokio::test]
    async fn head_reports_not_found() {
        let storage = MemoryStorage::new().with_bucket("media");
        let err = storage.head_object("media", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn unknown_bucket_is_not_a_missing_key() {
        let storage = MemoryStorage::new();
        let err = storage.head_object("media", "a").await.unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn list_pages_through_continuation_tokens() {
        let storage = MemoryStorage::new().with_bucket("media").with_page_size(2);
        for key in ["a", "b", "c", "d", "e"] {
            storage
                .put_object("media", key, body(b"x"), &Record::new())
                .await
                .unwrap();
        }

        let first = storage.list_objects("media", None, 1000).await.unwrap();
        assert_eq!(first.keys, vec!["a", "b"]);
        let token = first.next_continuation_token.unwrap();
        let second = storage
            .list_objects("media", Some(&token), 1000)
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["c", "d"]);
        let third = storage
            .list_objects("media", second.next_continuation_token.as_deref(), 1000)
            .await
            .unwrap();
        assert_eq!(third.keys, vec!["e"]);
        assert!(third.next_continuation_token.is_none());
    }

    #[tokio::test]
    async fn multipart_assembles_parts_in_order() {
        let storage = MemoryStorage::new().with_bucket("media");
        let upload_id = storage
            .create_multipart_upload("media", "big", &Record::new())
            .await
            .unwrap();
        let e1 = storage
            .upload_part("media", "big", &upload_id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();
        let e2 = storage
            .upload_part("media", "big", &upload_id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        let info = storage
            .complete_multipart_upload(
                "media",
                "big",
                &upload_id,
                &[
                    CompletedPart {
                        part_number: 1,
                        etag: e1,
                    },
                    CompletedPart {
                        part_number: 2,
                        etag: e2,
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(info.size, 11);
        assert!(info.etag.ends_with("-2"));
        assert_eq!(storage.pending_uploads().await, 0);

        let (_, stream) = storage.get_object("media", "big").await.unwrap();
        assert_eq!(collect(stream).await, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn copy_requires_source() {
        let storage = MemoryStorage::new().with_bucket("media");
        let err = storage.copy_object("media", "a", "b").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
