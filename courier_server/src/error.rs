use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use courier_core::{AuthError, CoreError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("database error: {0}")]
  Database(String),

  #[error("session store error: {0}")]
  Store(#[from] redis::RedisError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("authentication failed: {0}")]
  Unauthenticated(#[from] AuthError),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("validation error: {0}")]
  Validation(String),

  #[error("rate limited")]
  RateLimited,

  #[error("not found: {0}")]
  NotFound(String),

  #[error("configuration error: {0}")]
  Config(String),

  #[error("internal server error: {0}")]
  Internal(String),
}

impl From<CoreError> for AppError {
  fn from(error: CoreError) -> Self {
    match error {
      CoreError::Database(e) => AppError::Database(e),
      CoreError::Validation(msg) => AppError::Validation(msg),
      CoreError::NotFound(msg) => AppError::NotFound(msg),
      CoreError::Forbidden(msg) => AppError::Forbidden(msg),
      CoreError::Unauthenticated(e) => AppError::Unauthenticated(e),
      CoreError::RateLimited => AppError::RateLimited,
      CoreError::Internal(msg) => AppError::Internal(msg),
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let (status, error_message) = match self {
      AppError::Unauthenticated(e) => (StatusCode::UNAUTHORIZED, e.to_string()),
      AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
      AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
      AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
      AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate limited".to_string()),
      AppError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
      AppError::Store(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
      other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    };

    let body = Json(json!({
        "error": error_message,
        "status": status.as_u16()
    }));

    (status, body).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn core_error_kinds_map_onto_app_error() {
    let err: AppError = CoreError::Forbidden("not a participant".into()).into();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err: AppError = CoreError::Unauthenticated(AuthError::Expired).into();
    assert!(matches!(err, AppError::Unauthenticated(AuthError::Expired)));

    let err: AppError = CoreError::RateLimited.into();
    assert!(matches!(err, AppError::RateLimited));
  }

  #[test]
  fn business_errors_map_to_client_statuses() {
    let resp = AppError::NotFound("message 9 not found".into()).into_response();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = AppError::Validation("content too long".into()).into_response();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = AppError::Unauthenticated(AuthError::Malformed).into_response();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  }
}
