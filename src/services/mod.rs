//! Bucket-level services.
//!
//! [`BucketBackend`] is the capability set the [`bucket::Bucket`] facade is
//! written against. [`bucket_internal::BucketInternal`] implements it over
//! any [`crate::storage::ObjectStorage`]; tests may substitute their own.

use async_trait::async_trait;

use crate::{errors::BucketResult, models::object::Object};

pub mod bucket;
pub mod bucket_internal;

pub use bucket::{Bucket, BucketConfig, UploadStrategy};
pub use bucket_internal::BucketInternal;

/// Mechanical bucket operations, free of existence preconditions.
#[async_trait]
pub trait BucketBackend: Send + Sync {
    fn bucket_name(&self) -> &str;

    /// Public URL under which `key` is served. Does not check existence.
    fn public_url(&self, key: &str) -> String;

    /// Metadata-only probe. `false` only for a genuine "not found"; every
    /// other failure is returned as an error.
    async fn contains_object(&self, key: &str) -> BucketResult<bool>;

    /// Whole-body put. Overwrites silently.
    async fn create_object_single(&self, object: &mut Object) -> BucketResult<()>;

    /// Initiate, upload all parts, complete. Aborts the session on failure.
    async fn create_object_multipart(&self, object: &mut Object) -> BucketResult<()>;

    async fn get_object(&self, key: &str) -> BucketResult<Object>;

    /// Idempotent: deleting an absent key succeeds.
    async fn delete_object(&self, key: &str) -> BucketResult<()>;

    /// Copy to `new_key`, then delete `old_key`.
    ///
    /// - `Ok(())`: both steps applied.
    /// - `Err(Transport)`: the copy failed, nothing changed.
    /// - `Err(PartialRename)`: the copy landed but the delete failed; both
    ///   keys exist and the caller must reconcile.
    async fn rename_object(&self, old_key: &str, new_key: &str) -> BucketResult<()>;

    /// Every key in the bucket, continuation pages flattened.
    async fn list_contents(&self) -> BucketResult<Vec<String>>;
}
