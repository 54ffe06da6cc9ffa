//! BucketInternal maps bucket-level intents onto [`ObjectStorage`] calls.
//!
//! No preconditions are checked here: puts overwrite, deletes of absent keys
//! succeed, gets of absent keys fail with the capability's own `NotFound`.
//! The `Bucket` facade layers existence checks on top.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::{io, sync::Arc};
use tracing::{debug, warn};

use super::BucketBackend;
use crate::{
    errors::{BucketError, BucketResult},
    models::object::Object,
    storage::{ByteStream, CompletedPart, ObjectStorage},
};

/// 5 MiB, the smallest part most S3-compatible stores accept.
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;
const LIST_PAGE_SIZE: usize = 1000;

#[derive(Clone)]
pub struct BucketInternal {
    storage: Arc<dyn ObjectStorage>,
    bucket_name: String,
    public_url_base: String,
    part_size: usize,
}

impl BucketInternal {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        bucket_name: impl Into<String>,
        public_url_base: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            bucket_name: bucket_name.into(),
            public_url_base: public_url_base.into(),
            part_size: DEFAULT_PART_SIZE,
        }
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Cut `body` into `part_size` chunks and stage them in order.
    ///
    /// An empty body still produces one (empty) part. The bytes read must
    /// match `expected` when a size was declared.
    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        mut body: ByteStream,
        expected: Option<u64>,
    ) -> BucketResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut buffer = BytesMut::with_capacity(self.part_size);
        let mut total: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| input_error(key, source))?;
            total += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);
            while buffer.len() >= self.part_size {
                let data = buffer.split_to(self.part_size).freeze();
                let part = self.send_part(key, upload_id, parts.len(), data).await?;
                parts.push(part);
            }
        }

        if let Some(expected) = expected.filter(|expected| *expected != total) {
            return Err(size_mismatch(key, expected, total));
        }

        if !buffer.is_empty() || parts.is_empty() {
            let part = self
                .send_part(key, upload_id, parts.len(), buffer.freeze())
                .await?;
            parts.push(part);
        }

        Ok(parts)
    }

    async fn send_part(
        &self,
        key: &str,
        upload_id: &str,
        sent: usize,
        data: Bytes,
    ) -> BucketResult<CompletedPart> {
        let part_number = sent as u32 + 1;
        debug!(
            "uploading part {} of {}/{} ({} bytes)",
            part_number,
            self.bucket_name,
            key,
            data.len()
        );
        let etag = self
            .storage
            .upload_part(&self.bucket_name, key, upload_id, part_number, data)
            .await?;
        Ok(CompletedPart { part_number, etag })
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) {
        match self
            .storage
            .abort_multipart_upload(&self.bucket_name, key, upload_id)
            .await
        {
            Ok(()) => warn!(
                "aborted multipart upload {} for {}/{}",
                upload_id, self.bucket_name, key
            ),
            Err(err) => warn!(
                "failed to abort multipart upload {} for {}/{}: {}",
                upload_id, self.bucket_name, key, err
            ),
        }
    }
}

fn input_error(key: &str, source: io::Error) -> BucketError {
    BucketError::Input {
        source_name: key.to_string(),
        source,
    }
}

fn size_mismatch(key: &str, declared: u64, read: u64) -> BucketError {
    input_error(
        key,
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("declared size {} but read {} bytes", declared, read),
        ),
    )
}

fn take_body(object: &mut Object) -> BucketResult<ByteStream> {
    object.take_body().ok_or_else(|| {
        input_error(
            object.key(),
            io::Error::new(io::ErrorKind::UnexpectedEof, "body already consumed"),
        )
    })
}

#[async_trait]
impl BucketBackend for BucketInternal {
    fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_url_base.trim_end_matches('/'), key)
    }

    async fn contains_object(&self, key: &str) -> BucketResult<bool> {
        match self.storage.head_object(&self.bucket_name, key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_object_single(&self, object: &mut Object) -> BucketResult<()> {
        let body = take_body(object)?;
        let key = object.key().to_string();
        debug!("single-shot upload of {}/{}", self.bucket_name, key);

        // The live map goes straight to the capability; no copy is taken.
        let info = self
            .storage
            .put_object(&self.bucket_name, &key, body, object.metadata().as_record())
            .await?;

        if let Some(declared) = object.size().filter(|declared| *declared != info.size) {
            if let Err(err) = self.storage.delete_object(&self.bucket_name, &key).await {
                warn!(
                    "failed to remove short upload {}/{}: {}",
                    self.bucket_name, key, err
                );
            }
            return Err(size_mismatch(&key, declared, info.size));
        }

        object.record_upload(&info);
        Ok(())
    }

    async fn create_object_multipart(&self, object: &mut Object) -> BucketResult<()> {
        let body = take_body(object)?;
        let key = object.key().to_string();
        let upload_id = self
            .storage
            .create_multipart_upload(&self.bucket_name, &key, object.metadata().as_record())
            .await?;
        debug!(
            "multipart upload {} started for {}/{}",
            upload_id, self.bucket_name, key
        );

        let parts = match self.upload_parts(&key, &upload_id, body, object.size()).await {
            Ok(parts) => parts,
            Err(err) => {
                self.abort_upload(&key, &upload_id).await;
                return Err(err);
            }
        };

        match self
            .storage
            .complete_multipart_upload(&self.bucket_name, &key, &upload_id, &parts)
            .await
        {
            Ok(info) => {
                object.record_upload(&info);
                Ok(())
            }
            Err(err) => {
                self.abort_upload(&key, &upload_id).await;
                Err(err.into())
            }
        }
    }

    async fn get_object(&self, key: &str) -> BucketResult<Object> {
        let (info, body) = self.storage.get_object(&self.bucket_name, key).await?;
        Ok(Object::from_info(info, body))
    }

    async fn delete_object(&self, key: &str) -> BucketResult<()> {
        self.storage.delete_object(&self.bucket_name, key).await?;
        Ok(())
    }

    async fn rename_object(&self, old_key: &str, new_key: &str) -> BucketResult<()> {
        // A failed copy leaves the bucket untouched.
        self.storage
            .copy_object(&self.bucket_name, old_key, new_key)
            .await?;

        if let Err(source) = self.storage.delete_object(&self.bucket_name, old_key).await {
            warn!(
                "rename of {}/{} to {} copied but could not delete the source: {}",
                self.bucket_name, old_key, new_key, source
            );
            return Err(BucketError::PartialRename {
                old_key: old_key.to_string(),
                new_key: new_key.to_string(),
                bucket: self.bucket_name.clone(),
                source,
            });
        }
        Ok(())
    }

    async fn list_contents(&self) -> BucketResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .storage
                .list_objects(&self.bucket_name, token.as_deref(), LIST_PAGE_SIZE)
                .await?;
            keys.extend(page.keys);
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }
}
