use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Coarse classification shared by every cell error so handlers and callers
/// can decide how to react without matching on each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, rejected before touching storage.
    Validation,
    /// Lost a race or stale state; safe to retry after re-reading.
    Conflict,
    /// A business rule refused the action; never retried automatically.
    Policy,
    NotFound,
    Forbidden,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl AppError {
    /// Builds the HTTP-facing error for a classified cell error.
    pub fn from_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Validation => AppError::ValidationError(message),
            ErrorKind::Conflict => AppError::Conflict(message),
            ErrorKind::Policy => AppError::PolicyViolation(message),
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::Forbidden => AppError::Forbidden(message),
            ErrorKind::Internal => AppError::Internal(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Auth(_) | AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::BadRequest(_) | AppError::ValidationError(_) => ErrorKind::Validation,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::PolicyViolation(_) => ErrorKind::Policy,
            AppError::Internal(_) | AppError::Database(_) | AppError::ExternalService(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::PolicyViolation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::ExternalService(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        if status.is_server_error() {
            tracing::error!("Error: {}: {}", status, message);
        } else {
            tracing::warn!("Request rejected: {}: {}", status, message);
        }

        let body = Json(json!({
            "error": message,
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_expected_status_codes() {
        let cases = [
            (ErrorKind::Validation, StatusCode::BAD_REQUEST),
            (ErrorKind::Conflict, StatusCode::CONFLICT),
            (ErrorKind::Policy, StatusCode::UNPROCESSABLE_ENTITY),
            (ErrorKind::NotFound, StatusCode::NOT_FOUND),
            (ErrorKind::Forbidden, StatusCode::FORBIDDEN),
            (ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (kind, status) in cases {
            let response = AppError::from_kind(kind, "boom".to_string()).into_response();
            assert_eq!(response.status(), status, "kind {:?}", kind);
        }
    }
}
