use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced by the presence, matching and messaging core.
///
/// Only [`CoreError::Transient`] is worth retrying, and never automatically:
/// the caller decides. `NotFound` on a request transition means the caller is
/// looking at a stale view and should refresh.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("temporarily unavailable: {0}")]
    Transient(String),

    #[error("missing or invalid caller identity")]
    Unauthenticated,
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Authorization(_) => "authorization",
            Self::NotFound(_) => "not_found",
            Self::Transient(_) => "transient",
            Self::Unauthenticated => "unauthenticated",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("record".to_string()),
            other => {
                tracing::error!("Storage error: {}", other);
                Self::Transient(other.to_string())
            }
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
                "retryable": self.is_retryable(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(CoreError::Transient("db down".into()).is_retryable());
        assert!(!CoreError::validation("empty").is_retryable());
        assert!(!CoreError::authorization("nope").is_retryable());
        assert!(!CoreError::not_found("request").is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(CoreError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(CoreError::authorization("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(CoreError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(CoreError::Transient("x".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(CoreError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
