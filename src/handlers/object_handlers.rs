//! HTTP handlers for object operations on the served bucket.
//! Bodies are streamed in both directions; every precondition is enforced by
//! the `Bucket` facade.

use crate::{
    errors::AppError,
    models::{
        metadata::Metadata,
        object::{Object, ObjectBuilder},
    },
    services::{Bucket, BucketBackend},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{io, sync::Arc};

/// Router state: the single bucket this instance serves.
pub type SharedBucket = Arc<Bucket>;

const META_PREFIX: &str = "x-amz-meta-";

#[derive(Debug, Serialize)]
pub struct CreatedObject {
    pub key: String,
    pub size: Option<u64>,
    pub etag: Option<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameReq {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct KeyList {
    pub bucket: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
}

/// `PUT /objects/{*key}`: create a new object. Never overwrites.
pub async fn upload_object(
    State(bucket): State<SharedBucket>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let stream = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));
    let builder = ObjectBuilder::from_stream(key, Box::pin(stream), size)
        .with_metadata(metadata_from_headers(&headers));

    let object = bucket.create_object(builder).await?;
    let url = bucket.backend().public_url(object.key());

    Ok((
        StatusCode::CREATED,
        Json(CreatedObject {
            key: object.key().to_string(),
            size: object.size(),
            etag: object.etag().map(str::to_string),
            url,
        }),
    ))
}

/// `GET /objects/{*key}`: stream the object body.
pub async fn get_object(
    State(bucket): State<SharedBucket>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let mut object = bucket.get_object(&key).await?;
    let body = object
        .take_body()
        .map(Body::from_stream)
        .unwrap_or_else(Body::empty);

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &object);
    Ok(response)
}

/// `HEAD /objects/{*key}`: 200 when present, 404 otherwise.
pub async fn head_object(
    State(bucket): State<SharedBucket>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    if bucket.contains(&key).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

/// `DELETE /objects/{*key}`
pub async fn delete_object(
    State(bucket): State<SharedBucket>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    bucket.delete_object(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /rename` with `{"from": .., "to": ..}`
pub async fn rename_object(
    State(bucket): State<SharedBucket>,
    Json(req): Json<RenameReq>,
) -> Result<StatusCode, AppError> {
    if req.from.is_empty() || req.to.is_empty() {
        return Err(AppError::bad_request("`from` and `to` must both be set"));
    }
    bucket.rename_object(&req.from, &req.to).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /objects`: every key in the bucket.
pub async fn list_objects(State(bucket): State<SharedBucket>) -> Result<Json<KeyList>, AppError> {
    let keys = bucket.list_content().await?;
    Ok(Json(KeyList {
        bucket: bucket.name().to_string(),
        keys,
    }))
}

/// `GET /urls`
pub async fn list_urls(State(bucket): State<SharedBucket>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(bucket.list_urls().await?))
}

/// `GET /urls/{*key}`
pub async fn object_url(
    State(bucket): State<SharedBucket>,
    Path(key): Path<String>,
) -> Result<Json<UrlResponse>, AppError> {
    let url = bucket.public_url(&key).await?;
    Ok(Json(UrlResponse { url }))
}

/// Collect `x-amz-meta-*` headers (prefix stripped) and the content type.
fn metadata_from_headers(headers: &HeaderMap) -> Metadata {
    let mut metadata = Metadata::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        if let Some(meta_key) = name.as_str().strip_prefix(META_PREFIX) {
            metadata.set(meta_key, value);
        } else if *name == header::CONTENT_TYPE {
            metadata.set(header::CONTENT_TYPE.as_str(), value);
        }
    }
    metadata
}

fn set_object_headers(headers: &mut HeaderMap, object: &Object) {
    let content_type = object
        .metadata()
        .get(header::CONTENT_TYPE.as_str())
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    if let Some(size) = object.size() {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }

    if let Some(etag) = object.etag() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Some(last_modified) = object.last_modified() {
        if let Ok(value) = HeaderValue::from_str(&last_modified.to_rfc2822()) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }

    for (key, value) in object.metadata().as_record() {
        if key == header::CONTENT_TYPE.as_str() {
            continue;
        }
        let name = HeaderName::from_bytes(format!("{}{}", META_PREFIX, key).as_bytes());
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}
