//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that probes the storage backend

use crate::handlers::object_handlers::SharedBucket;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Issues an existence probe for a random key. A clean "absent" answer means
/// the backend is reachable and the bucket exists; any error means not ready
/// (HTTP 503).
pub async fn readyz(State(bucket): State<SharedBucket>) -> impl IntoResponse {
    let probe_key = format!(".readyz-{}", Uuid::new_v4());
    let storage_check = match bucket.contains(&probe_key).await {
        Ok(false) => CheckStatus {
            ok: true,
            error: None,
        },
        Ok(true) => CheckStatus {
            ok: false,
            error: Some(format!("probe key {} unexpectedly exists", probe_key)),
        },
        Err(e) => CheckStatus {
            ok: false,
            error: Some(format!("error: {}", e)),
        },
    };

    let overall_ok = storage_check.ok;
    let mut checks = HashMap::new();
    checks.insert("storage", storage_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        bucket: bucket.name().to_string(),
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    bucket: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{Bucket, BucketConfig, BucketInternal},
        storage::MemoryStorage,
    };
    use std::sync::Arc;

    fn bucket_over(storage: MemoryStorage) -> SharedBucket {
        let internal = BucketInternal::new(Arc::new(storage), "media", "http://localhost");
        Arc::new(Bucket::new(internal, BucketConfig::default()))
    }

    #[tokio::test]
    async fn ready_when_bucket_is_reachable() {
        let bucket = bucket_over(MemoryStorage::new().with_bucket("media"));
        let response = readyz(State(bucket)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn not_ready_when_bucket_is_missing() {
        let bucket = bucket_over(MemoryStorage::new());
        let response = readyz(State(bucket)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
