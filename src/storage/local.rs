//! LocalStorage: [`ObjectStorage`] backed by SQLite for metadata and local
//! disk for payloads.
//!
//! Payloads are sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//! Multipart parts are staged under `base_path/.multipart/{upload_id}/` until
//! the upload is completed or aborted. Bucket names can never start with a
//! dot, so the staging area never collides with a bucket directory.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ByteStream, CompletedPart, ListPage, ObjectInfo, ObjectStorage, StorageError, StorageResult,
    multipart_etag,
};
use crate::models::{
    bucket::BucketRecord,
    metadata::Record,
    multipart::{MultipartPart, MultipartUpload},
    object_record::ObjectRecord,
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");
const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const MAX_LIST_KEYS: usize = 1000;
const MULTIPART_DIR: &str = ".multipart";

#[derive(Clone)]
pub struct LocalStorage {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads are stored.
    pub base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(db: &SqlitePool) -> StorageResult<usize> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());

        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(db).await?;
        }

        Ok(statements.len())
    }

    /// Register `name` and create its directory unless both already exist.
    pub async fn ensure_bucket(&self, name: &str) -> StorageResult<BucketRecord> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        sqlx::query(
            "INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        self.fetch_bucket(name).await
    }

    /// Rejects keys that are empty, too long, absolute, contain `..`, or
    /// carry control characters or backslashes. Every `/`-separated segment
    /// must be a real file name, so `dir/`, `a//b` and `.` are refused.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.split('/').any(|segment| segment.is_empty() || segment == ".") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }

        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }

        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }

        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard ids: the first two bytes of MD5(bucket/key) as hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(MULTIPART_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.upload_dir(upload_id)
            .join(format!("part-{:05}", part_number))
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<BucketRecord> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, BucketRecord>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
                other => StorageError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, bucket: &BucketRecord, key: &str) -> StorageResult<ObjectRecord> {
        sqlx::query_as::<_, ObjectRecord>(
            "SELECT id, bucket_id, key, size_bytes, etag, metadata, last_modified
             FROM objects
             WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::NotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<MultipartUpload> {
        sqlx::query_as::<_, MultipartUpload>(
            "SELECT u.id, u.bucket_id, u.key, u.upload_id, u.metadata, u.initiated_at
             FROM multipart_uploads u
             JOIN buckets b ON b.id = u.bucket_id
             WHERE u.upload_id = ? AND b.name = ? AND u.key = ?",
        )
        .bind(upload_id)
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::NoSuchUpload {
                upload_id: upload_id.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Insert or overwrite the metadata row for `key`.
    async fn upsert_object(
        &self,
        bucket: &BucketRecord,
        key: &str,
        size: u64,
        etag: &str,
        metadata_json: &str,
    ) -> StorageResult<ObjectRecord> {
        let record = sqlx::query_as::<_, ObjectRecord>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, size_bytes, etag, metadata, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                metadata = excluded.metadata,
                last_modified = excluded.last_modified
            RETURNING id, bucket_id, key, size_bytes, etag, metadata, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(size as i64)
        .bind(etag)
        .bind(metadata_json)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        Ok(record)
    }

    /// Stream `body` into `target`.
    ///
    /// Bytes go to a temp file next to the target, are fsynced, then renamed
    /// into place. Returns the byte count and MD5 hex.
    async fn write_payload(&self, target: &Path, mut body: ByteStream) -> StorageResult<(u64, String)> {
        let tmp_path = temp_sibling(target).await?;
        let mut file = File::create(&tmp_path).await?;

        let mut size: u64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size += chunk.len() as u64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = finish_file(&mut file).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        replace_file(&tmp_path, target).await?;
        Ok((size, format!("{:x}", digest.compute())))
    }

    /// Concatenate staged parts into `out_path`.
    async fn assemble_parts(
        &self,
        upload_id: &str,
        parts: &[&MultipartPart],
        out_path: &Path,
    ) -> io::Result<()> {
        let mut out = File::create(out_path).await?;
        for part in parts {
            let mut src = File::open(self.part_path(upload_id, part.part_number as u32)).await?;
            tokio::io::copy(&mut src, &mut out).await?;
        }
        finish_file(&mut out).await
    }

    /// Remove a multipart session's rows and staged files.
    async fn discard_upload(&self, upload: &MultipartUpload) -> StorageResult<()> {
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload.id)
            .execute(&*self.db)
            .await?;
        sqlx::query("DELETE FROM multipart_uploads WHERE id = ?")
            .bind(upload.id)
            .execute(&*self.db)
            .await?;

        let dir = self.upload_dir(&upload.upload_id);
        match fs::remove_dir_all(&dir).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Recursively remove empty directories up to bucket root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        metadata: &Record,
    ) -> StorageResult<ObjectInfo> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let metadata_json = serde_json::to_string(metadata)?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let (size, etag) = self.write_payload(&file_path, body).await?;

        match self
            .upsert_object(&bucket_rec, key, size, &etag, &metadata_json)
            .await
        {
            Ok(record) => {
                debug!("stored {}/{} ({} bytes)", bucket, key, size);
                record.into_info()
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &Record,
    ) -> StorageResult<String> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload_id = Uuid::new_v4().to_string();
        fs::create_dir_all(self.upload_dir(&upload_id)).await?;

        sqlx::query(
            "INSERT INTO multipart_uploads (id, bucket_id, key, upload_id, metadata, initiated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(&upload_id)
        .bind(serde_json::to_string(metadata)?)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        debug!("initiated multipart upload {} for {}/{}", upload_id, bucket, key);
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
        let upload = self.fetch_upload(bucket, key, upload_id).await?;

        let body: ByteStream = Box::pin(stream::once(async move { Ok(data) }));
        let (size, etag) = self
            .write_payload(&self.part_path(upload_id, part_number), body)
            .await?;

        sqlx::query(
            "INSERT INTO multipart_parts (id, upload_id, part_number, size_bytes, etag, uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(upload_id, part_number) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded_at = excluded.uploaded_at",
        )
        .bind(Uuid::new_v4())
        .bind(upload.id)
        .bind(part_number as i64)
        .bind(size as i64)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<ObjectInfo> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload = self.fetch_upload(bucket, key, upload_id).await?;
        let staged = sqlx::query_as::<_, MultipartPart>(
            "SELECT id, upload_id, part_number, size_bytes, etag, uploaded_at
             FROM multipart_parts WHERE upload_id = ? ORDER BY part_number",
        )
        .bind(upload.id)
        .fetch_all(&*self.db)
        .await?;

        let mut ordered = Vec::with_capacity(parts.len());
        for part in parts {
            let invalid = |reason: &str| StorageError::InvalidPart {
                upload_id: upload_id.to_string(),
                part_number: part.part_number,
                reason: reason.into(),
            };
            let row = staged
                .iter()
                .find(|p| p.part_number == i64::from(part.part_number))
                .ok_or_else(|| invalid("part was never uploaded"))?;
            if row.etag != part.etag {
                return Err(invalid("etag mismatch"));
            }
            ordered.push(row);
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        let tmp_path = temp_sibling(&file_path).await?;
        if let Err(err) = self.assemble_parts(upload_id, &ordered, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        replace_file(&tmp_path, &file_path).await?;

        let size: u64 = ordered.iter().map(|p| p.size_bytes.max(0) as u64).sum();
        let etags: Vec<String> = ordered.iter().map(|p| p.etag.clone()).collect();
        let record = self
            .upsert_object(&bucket_rec, key, size, &multipart_etag(&etags), &upload.metadata)
            .await?;
        self.discard_upload(&upload).await?;

        debug!(
            "completed multipart upload {} for {}/{} ({} parts, {} bytes)",
            upload_id,
            bucket,
            key,
            ordered.len(),
            size
        );
        record.into_info()
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        let upload = self.fetch_upload(bucket, key, upload_id).await?;
        self.discard_upload(&upload).await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(ObjectInfo, ByteStream)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let record = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        fs::metadata(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        // Opened on first poll so unread bodies hold no file descriptor.
        let body = stream::once(File::open(file_path))
            .map_ok(ReaderStream::new)
            .try_flatten();
        Ok((record.into_info()?, Box::pin(body)))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await?.into_info()
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let result = sqlx::query("DELETE FROM objects WHERE key = ? AND bucket_id = ?")
            .bind(key)
            .bind(bucket_rec.id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            debug!("delete of absent object {}/{} ignored", bucket, key);
            return Ok(());
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(())
    }

    async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> StorageResult<ObjectInfo> {
        self.ensure_key_safe(src_key)?;
        self.ensure_key_safe(dst_key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let src = self.fetch_object(&bucket_rec, src_key).await?;
        if src_key == dst_key {
            return src.into_info();
        }

        let src_path = self.object_path(&bucket_rec.name, src_key);
        let dst_path = self.object_path(&bucket_rec.name, dst_key);
        let tmp_path = temp_sibling(&dst_path).await?;
        if let Err(err) = fs::copy(&src_path, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: src_key.to_string(),
                }
            } else {
                StorageError::Io(err)
            });
        }
        replace_file(&tmp_path, &dst_path).await?;

        let record = self
            .upsert_object(
                &bucket_rec,
                dst_key,
                src.size_bytes.max(0) as u64,
                &src.etag,
                &src.metadata,
            )
            .await?;
        record.into_info()
    }

    async fn list_objects(
        &self,
        bucket: &str,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> StorageResult<ListPage> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = max_keys.clamp(1, MAX_LIST_KEYS);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT key FROM objects WHERE bucket_id = ");
        builder.push_bind(bucket_rec.id);

        if let Some(token) = continuation_token {
            builder.push(" AND key > ");
            builder.push_bind(decode_continuation_token(token));
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut keys: Vec<String> = builder
            .build_query_scalar::<String>()
            .fetch_all(&*self.db)
            .await?;

        let mut next_continuation_token = None;
        if keys.len() == fetch_limit {
            keys.pop();
            next_continuation_token = keys.last().map(|k| encode_continuation_token(k));
        }

        Ok(ListPage {
            keys,
            next_continuation_token,
        })
    }
}

/// Create the parent of `target` and return a fresh temp path beside it.
async fn temp_sibling(target: &Path) -> StorageResult<PathBuf> {
    let parent = target.parent().map(Path::to_path_buf).ok_or_else(|| {
        StorageError::Io(io::Error::other(
            "payload path missing parent directory",
        ))
    })?;
    fs::create_dir_all(&parent).await?;
    Ok(parent.join(format!(".tmp-{}", Uuid::new_v4())))
}

async fn finish_file(file: &mut File) -> io::Result<()> {
    file.flush().await?;
    file.sync_all().await
}

/// Move `tmp_path` over `target`, removing the temp file on failure.
async fn replace_file(tmp_path: &Path, target: &Path) -> StorageResult<()> {
    if let Err(err) = fs::rename(tmp_path, target).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(target).await?;
            fs::rename(tmp_path, target).await?;
        } else {
            let _ = fs::remove_file(tmp_path).await;
            return Err(StorageError::Io(err));
        }
    }
    Ok(())
}

fn encode_continuation_token(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

/// Falls back to the raw token when it is not valid base64 of UTF-8.
fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}
