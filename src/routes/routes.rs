//! Defines routes for the served bucket.
//!
//! ## Structure
//! - **Health**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Object-level endpoints**
//!   - `PUT    /objects/{*key}` — create object (409 if the key exists)
//!   - `GET    /objects/{*key}` — download object
//!   - `HEAD   /objects/{*key}` — existence probe
//!   - `DELETE /objects/{*key}` — delete object
//!   - `POST   /rename`         — rename `{from, to}` via copy + delete
//!
//! - **Bucket-level endpoints**
//!   - `GET    /objects`        — list keys
//!   - `GET    /urls`           — list public URLs
//!   - `GET    /urls/{*key}`    — public URL of one object
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::handlers::{
    health_handlers::{healthz, readyz},
    object_handlers::{
        SharedBucket, delete_object, get_object, head_object, list_objects, list_urls, object_url,
        rename_object, upload_object,
    },
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. State is the shared [`crate::services::Bucket`].
pub fn routes() -> Router<SharedBucket> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Object-level routes
        .route(
            "/objects/{*key}",
            get(get_object)
                .put(upload_object)
                .head(head_object)
                .delete(delete_object),
        )
        .route("/rename", post(rename_object))
        // Bucket-level routes
        .route("/objects", get(list_objects))
        .route("/urls", get(list_urls))
        .route("/urls/{*key}", get(object_url))
}
