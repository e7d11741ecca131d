//! API errors
//!
//! Service errors are converted into an [`ApiError`] by the handler modules;
//! every variant renders as `{"error": "<message>"}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug)]
pub enum ApiError {
    /// Unknown pipeline, execution, deployment target, or an unknown or
    /// expired approval request (404)
    NotFound(String),
    /// Malformed body or invalid pipeline definition (400)
    BadRequest(String),
    /// Pipeline busy, approval already resolved, pipeline changed while an
    /// execution runs (409)
    Conflict(String),
    /// Details are logged, never returned (500)
    Database(sqlx::Error),
    /// Engine failure outside the categories above (500)
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) | ApiError::Conflict(msg) => msg,
            ApiError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                "Internal server error".to_string()
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                msg
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Database(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
