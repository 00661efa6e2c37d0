//! Service error → HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use tracing::error;

use crate::error::{ErrorBody, ErrorCode};
use crate::services::editor::EditorError;
use crate::services::raster::RasterError;
use crate::services::sync::SyncError;
use crate::store::StoreError;

/// Status code plus the `{code, message, retryable}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, err: &impl ErrorCode) -> Self {
        if status.is_server_error() {
            error!(code = err.error_code(), error = %err, "request failed");
        }
        Self { status, body: ErrorBody::from_error(err) }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        StoreError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn sync_status(err: &SyncError) -> StatusCode {
    match err {
        SyncError::NotLoaded => StatusCode::SERVICE_UNAVAILABLE,
        SyncError::Store(e) => store_status(e),
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::new(store_status(&err), &err)
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self::new(sync_status(&err), &err)
    }
}

impl From<EditorError> for ApiError {
    fn from(err: EditorError) -> Self {
        let status = match &err {
            EditorError::Fetch(_) => StatusCode::BAD_GATEWAY,
            EditorError::NotAnImage { .. } | EditorError::EmptyImage(_) | EditorError::TooLarge { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EditorError::Sync(e) => sync_status(e),
        };
        Self::new(status, &err)
    }
}

impl From<RasterError> for ApiError {
    fn from(err: RasterError) -> Self {
        let status = match err {
            RasterError::Empty => StatusCode::NOT_FOUND,
            RasterError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, &err)
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
