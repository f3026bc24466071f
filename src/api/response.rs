//! API response envelope and error mapping
//!
//! Every handler returns `ApiResponse<T>` on success. Failures map the
//! core taxonomy onto HTTP statuses; internal and upstream errors are
//! replaced by a user-safe message carrying a correlation id, with the
//! real error text only in the logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use feedmill_core::CoreError;

/// Standard success/error envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_id: None,
        }
    }
}

/// Handler error type, convertible from the core taxonomy.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error_id: Option<String>,
}

impl ApiError {
    /// 400 with a caller-visible message.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            error_id: None,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidArgument(message) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
                error_id: None,
            },
            CoreError::Unauthenticated => Self {
                status: StatusCode::UNAUTHORIZED,
                message: "authentication required".to_string(),
                error_id: None,
            },
            CoreError::NotFound(what) => Self {
                status: StatusCode::NOT_FOUND,
                message: format!("{what} not found"),
                error_id: None,
            },
            CoreError::RateLimited(reason) => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: reason,
                error_id: None,
            },
            CoreError::Canceled => Self {
                status: StatusCode::REQUEST_TIMEOUT,
                message: "request canceled".to_string(),
                error_id: None,
            },
            CoreError::Upstream { status, body } => {
                let error_id = Uuid::new_v4().to_string();
                error!(%error_id, upstream_status = status, "upstream failure: {body}");
                Self {
                    status: StatusCode::BAD_GATEWAY,
                    message: "upstream service error".to_string(),
                    error_id: Some(error_id),
                }
            }
            CoreError::Internal(detail) => {
                let error_id = Uuid::new_v4().to_string();
                error!(%error_id, "internal failure: {detail}");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".to_string(),
                    error_id: Some(error_id),
                }
            }
        }
    }
}

impl From<feedmill_storage::StorageError> for ApiError {
    fn from(err: feedmill_storage::StorageError) -> Self {
        ApiError::from(CoreError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
            error_id: self.error_id,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_keeps_message() {
        let err = ApiError::from(CoreError::InvalidArgument("content is empty".to_string()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "content is empty");
        assert!(err.error_id.is_none());
    }

    #[test]
    fn test_internal_error_is_masked_with_id() {
        let err = ApiError::from(CoreError::Internal(
            "sqlite disk io failure at /var/lib".to_string(),
        ));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "internal error");
        assert!(err.error_id.is_some());
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let err = ApiError::from(CoreError::NotFound("article x".to_string()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_rate_limited_maps_to_429() {
        let err = ApiError::from(CoreError::RateLimited("zone1 buffer".to_string()));
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
    }
}
