//! Multipart upload sessions and their staged parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An open multipart session. Deleted once completed or aborted.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartUpload {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Parent bucket ID.
    pub bucket_id: Uuid,

    /// Object key being uploaded.
    pub key: String,

    /// Upload id handed back to the caller.
    pub upload_id: String,

    /// Object metadata as a JSON map, applied on completion.
    pub metadata: String,

    /// Timestamp when upload was initiated.
    pub initiated_at: DateTime<Utc>,
}

/// A single staged part.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartPart {
    pub id: Uuid,

    /// Reference to parent session (`MultipartUpload::id`).
    pub upload_id: Uuid,

    /// Part number (1-based).
    pub part_number: i64,

    pub size_bytes: i64,

    /// MD5 hex of the part body.
    pub etag: String,

    pub uploaded_at: DateTime<Utc>,
}
