//! Test double wrapping `MemoryStorage`: records every call and can be told
//! to fail deletes.

#![allow(dead_code)]

use async_trait::async_trait;
use bucket_store::{
    models::metadata::Record,
    services::{Bucket, BucketConfig, BucketInternal},
    storage::{
        ByteStream, CompletedPart, ListPage, MemoryStorage, ObjectInfo, ObjectStorage,
        StorageError, StorageResult,
    },
};
use bytes::Bytes;
use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

pub const BUCKET: &str = "media";

const MUTATING: [&str; 6] = [
    "put_object",
    "create_multipart_upload",
    "upload_part",
    "complete_multipart_upload",
    "delete_object",
    "copy_object",
];

pub struct RecordingStorage {
    inner: MemoryStorage,
    calls: Mutex<Vec<&'static str>>,
    fail_delete: AtomicBool,
}

impl RecordingStorage {
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| MUTATING.contains(call))
            .count()
    }

    pub fn called(&self, op: &str) -> bool {
        self.calls().iter().any(|call| *call == op)
    }

    fn record(&self, op: &'static str) {
        self.calls.lock().unwrap().push(op);
    }
}

#[async_trait]
impl ObjectStorage for RecordingStorage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        metadata: &Record,
    ) -> StorageResult<ObjectInfo> {
        self.record("put_object");
        self.inner.put_object(bucket, key, body, metadata).await
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &Record,
    ) -> StorageResult<String> {
        self.record("create_multipart_upload");
        self.inner.create_multipart_upload(bucket, key, metadata).await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        self.record("upload_part");
        self.inner
            .upload_part(bucket, key, upload_id, part_number, data)
            .await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<ObjectInfo> {
        self.record("complete_multipart_upload");
        self.inner
            .complete_multipart_upload(bucket, key, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        self.record("abort_multipart_upload");
        self.inner.abort_multipart_upload(bucket, key, upload_id).await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(ObjectInfo, ByteStream)> {
        self.record("get_object");
        self.inner.get_object(bucket, key).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        self.record("head_object");
        self.inner.head_object(bucket, key).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.record("delete_object");
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected delete failure",
            )));
        }
        self.inner.delete_object(bucket, key).await
    }

    async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> StorageResult<ObjectInfo> {
        self.record("copy_object");
        self.inner.copy_object(bucket, src_key, dst_key).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> StorageResult<ListPage> {
        self.record("list_objects");
        self.inner
            .list_objects(bucket, continuation_token, max_keys)
            .await
    }
}

/// A facade over a fresh recording store holding an empty bucket.
pub fn bucket_with(config: BucketConfig) -> (Arc<RecordingStorage>, Bucket) {
    bucket_over(MemoryStorage::new().with_bucket(BUCKET), config)
}

pub fn bucket_over(inner: MemoryStorage, config: BucketConfig) -> (Arc<RecordingStorage>, Bucket) {
    let storage = Arc::new(RecordingStorage::new(inner));
    let internal = BucketInternal::new(storage.clone(), BUCKET, "https://cdn.example.com/media")
        .with_part_size(8);
    (storage, Bucket::new(internal, config))
}
