use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use db::{DbErr, models::task::TaskError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utils_jwt::AuthError;

pub const TASK_NOT_FOUND: &str = "Task not found";
const INTERNAL_SERVER_ERROR: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] DbErr),
    #[error("storage operation timed out after {0:?}")]
    StorageTimeout(Duration),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Database(db_err) => ApiError::Storage(db_err),
            TaskError::TaskNotFound => ApiError::NotFound(TASK_NOT_FOUND.to_string()),
            TaskError::ValidationError(msg) => ApiError::Validation(msg),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "ValidationError"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "StorageError"),
            ApiError::StorageTimeout(_) => (StatusCode::INTERNAL_SERVER_ERROR, "StorageTimeout"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        // Server-side details go to the log only.
        let detail = match &self {
            ApiError::Unauthorized(_) => "Unauthorized".to_string(),
            ApiError::Validation(msg) => msg.clone(),
            ApiError::NotFound(msg) => msg.clone(),
            _ => INTERNAL_SERVER_ERROR.to_string(),
        };

        if status_code.is_server_error() {
            tracing::error!(
                status = %status_code,
                error_type,
                error = %self,
                "API request failed"
            );
        }
        let mut response = (status_code, Json(ErrorBody { detail })).into_response();
        if status_code == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn detail_of(err: ApiError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body.detail)
    }

    #[tokio::test]
    async fn api_error_maps_to_expected_http_statuses() {
        assert_eq!(
            detail_of(ApiError::Unauthorized(AuthError::Expired)).await,
            (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
        );
        assert_eq!(
            detail_of(ApiError::Validation("title: must not be blank".to_string())).await,
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                "title: must not be blank".to_string()
            )
        );
        assert_eq!(
            detail_of(ApiError::from(TaskError::TaskNotFound)).await,
            (StatusCode::NOT_FOUND, TASK_NOT_FOUND.to_string())
        );
        assert_eq!(
            detail_of(ApiError::StorageTimeout(Duration::from_secs(5)))
                .await
                .0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn server_errors_do_not_leak_internals() {
        let err = ApiError::from(TaskError::Database(DbErr::Custom(
            "no such table: tasks_secret".to_string(),
        )));
        let (status, detail) = detail_of(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(detail, INTERNAL_SERVER_ERROR);

        let (_, detail) = detail_of(ApiError::Internal("join error: panicked".into())).await;
        assert!(!detail.contains("panicked"));
    }

    #[tokio::test]
    async fn auth_failure_reason_is_not_echoed() {
        let (_, detail) =
            detail_of(ApiError::Unauthorized(AuthError::InvalidClaims("aud".into()))).await;
        assert_eq!(detail, "Unauthorized");
    }
}
