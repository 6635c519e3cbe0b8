//! HTTP error mapping.

use crate::wallet::sync::background::WorkerError;
use crate::wallet::{StoreError, WalletSyncError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad or missing request parameter.
    #[error("{0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The sync worker cannot take the job right now.
    #[error("{0}")]
    Unavailable(#[from] WorkerError),

    /// A sync failed for a reason other than bad input.
    #[error("{0}")]
    Sync(WalletSyncError),
}

impl From<WalletSyncError> for ApiError {
    fn from(err: WalletSyncError) -> Self {
        match err {
            WalletSyncError::Validation(message) => ApiError::Validation(message),
            WalletSyncError::Store(e) => ApiError::Store(e),
            other => ApiError::Sync(other),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Sync(err) => match err {
                WalletSyncError::Validation(_) => StatusCode::BAD_REQUEST,
                WalletSyncError::AlreadySyncing(_) => StatusCode::CONFLICT,
                WalletSyncError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                WalletSyncError::Upstream { .. }
                | WalletSyncError::Transport(_)
                | WalletSyncError::CursorStalled { .. } => StatusCode::BAD_GATEWAY,
                WalletSyncError::Store(_) | WalletSyncError::StreamClosed => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
