//! Bucket: the public facade over a [`BucketBackend`].
//!
//! Adds the existence preconditions object storage does not enforce:
//! creates must not overwrite, and reads, deletes and renames must target
//! an object that exists. It also picks the upload protocol by size.
//!
//! # Races
//!
//! Every precondition is a separate round-trip issued before the mutating
//! call (check-then-act). Two callers creating the same key can both pass the
//! check and the later write wins. The guarantee is "no conflict was observed
//! at check time", not linearizable conditional writes.

use futures::{StreamExt, TryStreamExt, stream};
use std::path::Path;
use tracing::{debug, info};

use super::{BucketBackend, BucketInternal};
use crate::{
    errors::{BucketError, BucketResult},
    models::object::{Object, ObjectBuilder},
};

/// 5 MiB.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Objects larger than this many bytes go through multipart upload.
    pub multipart_threshold: u64,
    /// Cap on concurrent fetches in [`Bucket::get_all_objects`]. `None` is
    /// unbounded.
    pub fetch_concurrency: Option<usize>,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            fetch_concurrency: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    Single,
    Multipart,
}

impl UploadStrategy {
    /// Sizes up to and including `threshold` use a single put.
    pub fn for_size(size: u64, threshold: u64) -> Self {
        if size <= threshold {
            UploadStrategy::Single
        } else {
            UploadStrategy::Multipart
        }
    }
}

pub struct Bucket<B = BucketInternal> {
    backend: B,
    config: BucketConfig,
}

impl<B: BucketBackend> Bucket<B> {
    pub fn new(backend: B, config: BucketConfig) -> Self {
        Self { backend, config }
    }

    pub fn name(&self) -> &str {
        self.backend.bucket_name()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    async fn assert_absent(&self, key: &str) -> BucketResult<()> {
        if self.backend.contains_object(key).await? {
            return Err(BucketError::ExistingObject {
                key: key.to_string(),
                bucket: self.name().to_string(),
            });
        }
        Ok(())
    }

    async fn assert_present(&self, key: &str) -> BucketResult<()> {
        if !self.backend.contains_object(key).await? {
            return Err(BucketError::MissingObject {
                key: key.to_string(),
                bucket: self.name().to_string(),
            });
        }
        Ok(())
    }

    /// Upload a new object. Fails with `ExistingObject` if the key is taken
    /// and with `UnknownSize` if the builder carries no size.
    pub async fn create_object(&self, builder: ObjectBuilder) -> BucketResult<Object> {
        let mut object = builder.build();
        self.assert_absent(object.key()).await?;

        let size = object.size().ok_or_else(|| BucketError::UnknownSize {
            key: object.key().to_string(),
        })?;

        let strategy = UploadStrategy::for_size(size, self.config.multipart_threshold);
        debug!(
            "creating {}/{} ({} bytes) via {:?}",
            self.name(),
            object.key(),
            size,
            strategy
        );
        match strategy {
            UploadStrategy::Single => self.backend.create_object_single(&mut object).await?,
            UploadStrategy::Multipart => self.backend.create_object_multipart(&mut object).await?,
        }

        info!("created {}/{}", self.name(), object.key());
        Ok(object)
    }

    pub async fn create_object_from_file(&self, path: impl AsRef<Path>) -> BucketResult<Object> {
        let builder = ObjectBuilder::from_file(path).await?;
        self.create_object(builder).await
    }

    pub async fn get_object(&self, key: &str) -> BucketResult<Object> {
        self.assert_present(key).await?;
        self.backend.get_object(key).await
    }

    pub async fn delete_object(&self, key: &str) -> BucketResult<()> {
        self.assert_present(key).await?;
        self.backend.delete_object(key).await?;
        info!("deleted {}/{}", self.name(), key);
        Ok(())
    }

    /// Move `old_key` to `new_key`.
    ///
    /// Both preconditions run concurrently; they touch disjoint keys. See
    /// [`BucketBackend::rename_object`] for the three possible outcomes.
    pub async fn rename_object(&self, old_key: &str, new_key: &str) -> BucketResult<()> {
        tokio::try_join!(self.assert_absent(new_key), self.assert_present(old_key))?;
        self.backend.rename_object(old_key, new_key).await?;
        info!("renamed {}/{} to {}", self.name(), old_key, new_key);
        Ok(())
    }

    /// Fetch every object. Results follow the listing order, not completion
    /// order.
    pub async fn get_all_objects(&self) -> BucketResult<Vec<Object>> {
        let keys = self.backend.list_contents().await?;
        let limit = self.config.fetch_concurrency.unwrap_or(keys.len()).max(1);
        debug!(
            "fetching {} objects from {} ({} in flight)",
            keys.len(),
            self.name(),
            limit
        );

        let backend = &self.backend;
        stream::iter(keys)
            .map(|key| async move { backend.get_object(&key).await })
            .buffered(limit)
            .try_collect()
            .await
    }

    pub async fn contains(&self, key: &str) -> BucketResult<bool> {
        self.backend.contains_object(key).await
    }

    pub async fn list_content(&self) -> BucketResult<Vec<String>> {
        self.backend.list_contents().await
    }

    /// Public URL of an existing object.
    pub async fn public_url(&self, key: &str) -> BucketResult<String> {
        self.assert_present(key).await?;
        Ok(self.backend.public_url(key))
    }

    /// Public URLs of every object, in listing order.
    pub async fn list_urls(&self) -> BucketResult<Vec<String>> {
        let keys = self.backend.list_contents().await?;
        Ok(keys.iter().map(|key| self.backend.public_url(key)).collect())
    }
}
