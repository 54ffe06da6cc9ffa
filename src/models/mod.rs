//! Data models for the bucket layer.
//!
//! `metadata` and `object` are the entities callers handle; `bucket`,
//! `object_record` and `multipart` are the SQLite rows of the local backend,
//! mapped via `sqlx::FromRow`.

pub mod bucket;
pub mod metadata;
pub mod multipart;
pub mod object;
pub mod object_record;
