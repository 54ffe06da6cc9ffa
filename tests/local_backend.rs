use axum::http::StatusCode;
use bucket_store::{
    BucketError, ObjectBuilder,
    errors::AppError,
    services::{Bucket, BucketConfig, BucketInternal},
    storage::{LocalStorage, StorageError},
};
use bytes::Bytes;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;

async fn local_bucket(dir: &tempfile::TempDir) -> Bucket {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    LocalStorage::migrate(&pool).await.unwrap();
    let storage = LocalStorage::new(Arc::new(pool), dir.path());
    storage.ensure_bucket("uploads").await.unwrap();

    let internal = BucketInternal::new(Arc::new(storage), "uploads", "http://localhost:3000/objects")
        .with_part_size(1024);
    Bucket::new(
        internal,
        BucketConfig {
            multipart_threshold: 2048,
            fetch_concurrency: Some(4),
        },
    )
}

#[tokio::test]
async fn facade_over_sqlite_and_disk() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = local_bucket(&dir).await;

    let small = bucket
        .create_object(ObjectBuilder::from_bytes("docs/small.txt", "tiny").with_meta("lang", "en"))
        .await
        .unwrap();
    assert_eq!(small.size(), Some(4));

    let large_payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let large = bucket
        .create_object(ObjectBuilder::from_bytes("video/large.bin", large_payload.clone()))
        .await
        .unwrap();
    // 1024 * 4 + 904
    assert!(large.etag().unwrap().ends_with("-5"));

    let err = bucket
        .create_object(ObjectBuilder::from_bytes("docs/small.txt", "again"))
        .await
        .unwrap_err();
    assert!(matches!(err, BucketError::ExistingObject { .. }));

    let mut fetched = bucket.get_object("video/large.bin").await.unwrap();
    assert_eq!(fetched.size(), Some(5000));
    assert_eq!(
        fetched.read_to_bytes().await.unwrap(),
        Bytes::from(large_payload)
    );

    bucket
        .rename_object("docs/small.txt", "docs/renamed.txt")
        .await
        .unwrap();
    assert_eq!(
        bucket.list_content().await.unwrap(),
        vec!["docs/renamed.txt", "video/large.bin"]
    );

    let mut all = bucket.get_all_objects().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].metadata().get("lang"), Some("en"));
    assert_eq!(
        all[0].read_to_bytes().await.unwrap(),
        Bytes::from_static(b"tiny")
    );

    bucket.delete_object("video/large.bin").await.unwrap();
    assert!(!bucket.contains("video/large.bin").await.unwrap());
    assert!(!dir.path().join(".multipart").read_dir().unwrap().any(|_| true));
}

#[tokio::test]
async fn fetched_bodies_open_payloads_on_first_read() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = local_bucket(&dir).await;
    for i in 0..64 {
        bucket
            .create_object(ObjectBuilder::from_bytes(format!("k/{i:03}"), format!("v{i}")))
            .await
            .unwrap();
    }

    let mut all = bucket.get_all_objects().await.unwrap();
    assert_eq!(all.len(), 64);

    // Payload removed after the fetch: a body that already held the file
    // open would still read it.
    let mut first = all.remove(0);
    bucket.delete_object("k/000").await.unwrap();
    let err = first.read_to_bytes().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);

    for mut object in all {
        let expected = format!("v{}", object.key()[2..].parse::<u32>().unwrap());
        assert_eq!(object.read_to_bytes().await.unwrap(), Bytes::from(expected));
    }
}

#[tokio::test]
async fn directory_like_keys_are_client_errors() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = local_bucket(&dir).await;

    for key in ["photos/", "."] {
        let err = bucket
            .create_object(ObjectBuilder::from_bytes(key, "x"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, BucketError::Transport(StorageError::InvalidObjectKey)),
            "{key}"
        );
        assert_eq!(AppError::from(err).status, StatusCode::BAD_REQUEST);
    }
    assert!(bucket.list_content().await.unwrap().is_empty());
}
