//! Represents an object (blob) moving in or out of a bucket.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{TryStreamExt, stream};
use std::{fmt, io, path::Path};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use super::metadata::Metadata;
use crate::{
    errors::{BucketError, BucketResult},
    storage::{ByteStream, ObjectInfo},
};

/// A single object: its key, metadata, declared size and a one-shot body.
///
/// The body behaves like a network response body: it can be taken exactly
/// once. Reading it again is the caller's mistake; the object only reports
/// that nothing is left.
pub struct Object {
    key: String,
    metadata: Metadata,
    size: Option<u64>,
    etag: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    body: Option<ByteStream>,
}

impl Object {
    pub fn new(
        key: impl Into<String>,
        body: ByteStream,
        metadata: Metadata,
        size: Option<u64>,
    ) -> Self {
        Self {
            key: key.into(),
            metadata,
            size,
            etag: None,
            last_modified: None,
            body: Some(body),
        }
    }

    /// Rebuild an object from what the storage capability returned.
    pub fn from_info(info: ObjectInfo, body: ByteStream) -> Self {
        Self {
            key: info.key,
            metadata: Metadata::from(info.metadata),
            size: Some(info.size),
            etag: Some(info.etag),
            last_modified: Some(info.last_modified),
            body: Some(body),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Declared size in bytes, if known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    /// Hand out the body stream. Returns `None` once it has been taken.
    pub fn take_body(&mut self) -> Option<ByteStream> {
        self.body.take()
    }

    /// Drain the body into memory.
    pub async fn read_to_bytes(&mut self) -> io::Result<Bytes> {
        let body = self.take_body().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("body of `{}` was already consumed", self.key),
            )
        })?;
        let data = body
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(data.freeze())
    }

    /// Record what the storage capability reported after a successful write.
    pub(crate) fn record_upload(&mut self, info: &ObjectInfo) {
        self.size = Some(info.size);
        self.etag = Some(info.etag.clone());
        self.last_modified = Some(info.last_modified);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("key", &self.key)
            .field("metadata", &self.metadata)
            .field("size", &self.size)
            .field("etag", &self.etag)
            .field("last_modified", &self.last_modified)
            .field("body_consumed", &self.body.is_none())
            .finish()
    }
}

/// Staged construction of an [`Object`] for upload.
pub struct ObjectBuilder {
    key: String,
    body: ByteStream,
    size: Option<u64>,
    metadata: Metadata,
}

impl ObjectBuilder {
    /// Open `path` for streaming. The key defaults to the file name and the
    /// size to the file length.
    pub async fn from_file(path: impl AsRef<Path>) -> BucketResult<Self> {
        let path = path.as_ref();
        let input_error = |source: io::Error| BucketError::Input {
            source_name: path.display().to_string(),
            source,
        };

        let name = path.file_name().ok_or_else(|| {
            input_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path has no file name",
            ))
        })?;
        let key = name.to_str().map(str::to_string).ok_or_else(|| {
            input_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file name is not valid UTF-8",
            ))
        })?;

        let file = File::open(path).await.map_err(input_error)?;
        let meta = file.metadata().await.map_err(input_error)?;
        if !meta.is_file() {
            return Err(input_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        Ok(Self {
            key,
            body: Box::pin(ReaderStream::new(file)),
            size: Some(meta.len()),
            metadata: Metadata::new(),
        })
    }

    pub fn from_bytes(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let size = data.len() as u64;
        Self {
            key: key.into(),
            body: Box::pin(stream::once(async move { Ok(data) })),
            size: Some(size),
            metadata: Metadata::new(),
        }
    }

    /// Wrap an arbitrary stream. `size` is `None` when the length is unknown;
    /// such a builder is rejected by `Bucket::create_object`.
    pub fn from_stream(key: impl Into<String>, body: ByteStream, size: Option<u64>) -> Self {
        Self {
            key: key.into(),
            body,
            size,
            metadata: Metadata::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.set(key, value);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn build(self) -> Object {
        Object::new(self.key, self.body, self.metadata, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn from_file_resolves_key_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"jpeg bytes").unwrap();

        let builder = ObjectBuilder::from_file(&path).await.unwrap();
        assert_eq!(builder.key(), "photo.jpg");
        assert_eq!(builder.size(), Some(10));

        let mut object = builder.with_meta("owner", "ops").build();
        assert_eq!(object.metadata().get("owner"), Some("ops"));
        assert_eq!(
            object.read_to_bytes().await.unwrap(),
            Bytes::from_static(b"jpeg bytes")
        );
    }

    #[tokio::test]
    async fn from_file_missing_source_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ObjectBuilder::from_file(dir.path().join("absent.bin"))
            .await
            .err()
            .unwrap();
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn from_file_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = ObjectBuilder::from_file(dir.path()).await.err().unwrap();
        assert!(matches!(err, BucketError::Input { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn from_file_rejects_non_utf8_names() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OsStr::from_bytes(b"\xffa.bin"));
        std::fs::write(&path, b"payload").unwrap();

        let err = ObjectBuilder::from_file(&path).await.err().unwrap();
        match err {
            BucketError::Input { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidInput);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn body_is_single_use() {
        let mut object = ObjectBuilder::from_bytes("a", "abc").build();
        assert_eq!(object.size(), Some(3));
        assert_eq!(
            object.read_to_bytes().await.unwrap(),
            Bytes::from_static(b"abc")
        );
        assert!(object.take_body().is_none());
        let err = object.read_to_bytes().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn builder_overrides() {
        let meta: Metadata = [("k", "v")].into_iter().collect();
        let object = ObjectBuilder::from_bytes("a", "abc")
            .with_key("renamed")
            .with_metadata(meta.clone())
            .build();
        assert_eq!(object.key(), "renamed");
        assert_eq!(object.metadata(), &meta);
        assert!(object.etag().is_none());
    }
}
