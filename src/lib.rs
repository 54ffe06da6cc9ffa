//! Bucket-scoped object storage.
//!
//! [`services::Bucket`] is the entry point: a facade over one bucket that
//! refuses to overwrite on create, refuses to read, delete or rename objects
//! that do not exist, and uploads large payloads through multipart upload.
//! The raw storage it drives is any [`storage::ObjectStorage`]; two ship with
//! the crate, [`storage::LocalStorage`] (SQLite + disk) and
//! [`storage::MemoryStorage`].

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;

pub use errors::{BucketError, BucketResult};
pub use models::{
    metadata::Metadata,
    object::{Object, ObjectBuilder},
};
pub use services::{Bucket, BucketBackend, BucketConfig, BucketInternal};
