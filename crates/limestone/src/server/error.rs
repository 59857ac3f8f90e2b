//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::Error;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No valid operator session.
    #[error("authentication required")]
    AuthenticationRequired,

    /// Missing or wrong bearer key.
    #[error("forbidden")]
    AuthorizationDenied,

    /// Login with wrong username or password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Request body could not be decoded.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The store failed while serving the request.
    #[error("data unavailable: {0}")]
    DataUnavailable(#[from] Error),

    /// The blocking task running the request was lost.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::AuthenticationRequired | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::AuthorizationDenied => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::DataUnavailable(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::DataUnavailable(err) => {
                error!(error = %err, "Request failed in storage");
                "data unavailable".to_string()
            }
            Self::Internal(err) => {
                error!(error = %err, "Request task failed");
                "internal error".to_string()
            }
            Self::BadRequest(_) => {
                warn!(error = %self, "Rejected request body");
                self.to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
