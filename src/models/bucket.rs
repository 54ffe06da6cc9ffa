//! Row describing a bucket known to the local backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A bucket namespace as persisted in SQLite.
///
/// Names follow S3 DNS rules and are unique; the row id keys every object and
/// multipart session that belongs to the bucket.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct BucketRecord {
    /// Internal UUID used as foreign key.
    pub id: Uuid,

    /// Bucket name (3-63 chars, lowercase letters, digits, dots, hyphens).
    pub name: String,

    /// When this bucket was first registered.
    pub created_at: DateTime<Utc>,
}
