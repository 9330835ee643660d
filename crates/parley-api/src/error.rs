use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use parley_db::StoreError;

/// Every way a request can fail. Rendered as `{"error": "<message>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    #[error("Invalid credentials")]
    Authentication,

    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation, e.g. a taken username.
    #[error("{0}")]
    Conflict(String),

    /// The request points at a user or chat that does not exist.
    #[error("{0}")]
    Referential(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Store busy or the request timed out. The caller may retry.
    #[error("Service temporarily unavailable")]
    Transient,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Referential(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Transient | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(detail) => {
                error!("Internal error: {}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (self.status(), axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(detail) => {
                let message = if detail.contains("users.username") {
                    "Username already taken"
                } else if detail.contains("users.email") {
                    "Email already registered"
                } else {
                    "Record already exists"
                };
                ApiError::Conflict(message.to_string())
            }
            StoreError::Referential => {
                ApiError::Referential("Referenced user or chat does not exist".to_string())
            }
            StoreError::NotFound => ApiError::NotFound("Not found".to_string()),
            e if e.is_transient() => {
                warn!("Transient store failure: {}", e);
                ApiError::Transient
            }
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_taxonomy() {
        let conflict: ApiError =
            StoreError::Conflict("UNIQUE constraint failed: users.username".into()).into();
        assert!(matches!(conflict, ApiError::Conflict(ref m) if m == "Username already taken"));
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let email: ApiError =
            StoreError::Conflict("UNIQUE constraint failed: users.email".into()).into();
        assert!(matches!(email, ApiError::Conflict(ref m) if m == "Email already registered"));

        let missing: ApiError = StoreError::NotFound.into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let dangling: ApiError = StoreError::Referential.into();
        assert_eq!(dangling.status(), StatusCode::BAD_REQUEST);

        let busy: ApiError = StoreError::Unavailable.into();
        assert!(matches!(busy, ApiError::Transient));
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let err = ApiError::Internal("disk I/O error at page 7".into());
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
