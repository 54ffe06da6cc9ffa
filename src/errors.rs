use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

use crate::storage::StorageError;

/// Failures surfaced by the bucket layer.
///
/// Precondition violations (`MissingObject`, `ExistingObject`) are raised
/// before any mutating storage call. `PartialRename` is the only variant that
/// reports a half-applied change.
#[derive(Debug, Error)]
pub enum BucketError {
    #[error("object `{key}` does not exist in bucket `{bucket}`")]
    MissingObject { key: String, bucket: String },

    #[error("object `{key}` already exists in bucket `{bucket}`")]
    ExistingObject { key: String, bucket: String },

    #[error("cannot read upload source `{source_name}`: {source}")]
    Input {
        source_name: String,
        #[source]
        source: io::Error,
    },

    #[error("size of object `{key}` is unknown")]
    UnknownSize { key: String },

    /// Copy succeeded, delete failed: both keys now exist.
    #[error(
        "rename of `{old_key}` to `{new_key}` in bucket `{bucket}` copied the object but failed to delete the source: {source}"
    )]
    PartialRename {
        old_key: String,
        new_key: String,
        bucket: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Transport(#[from] StorageError),
}

impl BucketError {
    /// The upload source could not be read or sized.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            BucketError::Input { .. } | BucketError::UnknownSize { .. }
        )
    }
}

pub type BucketResult<T> = Result<T, BucketError>;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<BucketError> for AppError {
    fn from(err: BucketError) -> Self {
        let status = match &err {
            BucketError::MissingObject { .. } => StatusCode::NOT_FOUND,
            BucketError::ExistingObject { .. } => StatusCode::CONFLICT,
            BucketError::UnknownSize { .. } => StatusCode::LENGTH_REQUIRED,
            BucketError::Input { .. } => StatusCode::BAD_REQUEST,
            BucketError::PartialRename { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            BucketError::Transport(StorageError::InvalidObjectKey)
            | BucketError::Transport(StorageError::InvalidBucketName { .. }) => {
                StatusCode::BAD_REQUEST
            }
            BucketError::Transport(_) => StatusCode::BAD_GATEWAY,
        };
        AppError::new(status, err.to_string())
    }
}
