use thiserror::Error;

use crate::jwt::AuthError;

/// Closed set of failure kinds crossing service boundaries.
///
/// Infrastructure failures (store, bus) are downgraded where they occur and
/// never surface through this enum; everything here is a business outcome
/// the transport layer knows how to present.
#[derive(Error, Debug)]
pub enum CoreError {
  #[error("database error: {0}")]
  Database(String),

  #[error("validation error: {0}")]
  Validation(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("unauthenticated: {0}")]
  Unauthenticated(#[from] AuthError),

  #[error("rate limited")]
  RateLimited,

  #[error("internal error: {0}")]
  Internal(String),
}

impl CoreError {
  pub fn from_sqlx(err: sqlx::Error) -> Self {
    match err {
      sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
      other => CoreError::Database(other.to_string()),
    }
  }
}

impl From<sqlx::Error> for CoreError {
  fn from(err: sqlx::Error) -> Self {
    CoreError::from_sqlx(err)
  }
}
