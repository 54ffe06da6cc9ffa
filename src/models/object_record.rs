//! Row describing an object stored by the local backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::storage::{ObjectInfo, StorageResult};

/// Metadata row for one object; the payload itself lives on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the body, or the multipart composite ETag.
    pub etag: String,

    /// User metadata serialized as a flat JSON map.
    pub metadata: String,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,
}

impl ObjectRecord {
    pub fn into_info(self) -> StorageResult<ObjectInfo> {
        Ok(ObjectInfo {
            metadata: serde_json::from_str(&self.metadata)?,
            key: self.key,
            size: self.size_bytes.max(0) as u64,
            etag: self.etag,
            last_modified: self.last_modified,
        })
    }
}
