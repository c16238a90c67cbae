//! Request authentication middleware.
//!
//! Wrapped via `axum::middleware::from_fn_with_state`. The generic state
//! only needs to verify an access token, which keeps the middleware
//! testable without the full application state.

use axum::{
  body::Body,
  extract::{Request, State},
  http::{header, HeaderMap, StatusCode},
  middleware::Next,
  response::{IntoResponse, Response},
};
use tracing::warn;

use courier_core::{AuthError, TokenClaims};

/// Anything that can validate an access token. [`crate::state::AppState`]
/// implements this.
pub trait TokenVerifier {
  fn verify_access_token(&self, token: &str) -> Result<TokenClaims, AuthError>;
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
  let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
  value.strip_prefix("Bearer ").map(|t| t.trim().to_string())
}

pub async fn verify_token_middleware<T>(
  State(state): State<T>,
  mut req: Request<Body>,
  next: Next,
) -> Response
where
  T: TokenVerifier + Clone + Send + Sync + 'static,
{
  let Some(token) = bearer_token(req.headers()) else {
    return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
  };

  match state.verify_access_token(&token) {
    Ok(claims) => {
      req.extensions_mut().insert(claims);
      next.run(req).await
    }
    Err(e) => {
      warn!("token verification failed: {}", e);
      (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::HeaderValue;
  use axum::{middleware::from_fn_with_state, routing::get, Router};
  use chrono::Utc;
  use courier_core::jwt::{Claims, TokenKind};
  use courier_core::TokenManager;
  use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
  use tower::ServiceExt;

  const SECRET: &str = "middleware-test-secret-32-bytes-long";

  #[derive(Clone)]
  struct TestState {
    tokens: TokenManager,
  }

  impl TokenVerifier for TestState {
    fn verify_access_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
      self.tokens.verify_access(token)
    }
  }

  fn mint(kind: TokenKind) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
      sub: "7".to_string(),
      exp: (now + 600) as usize,
      iat: now as usize,
      kind,
      jti: None,
    };
    encode(
      &Header::default(),
      &claims,
      &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
  }

  fn app() -> Router {
    let state = TestState {
      tokens: TokenManager::new(SECRET, Algorithm::HS256),
    };
    Router::new()
      .route("/protected", get(|| async { "OK" }))
      .layer(from_fn_with_state(
        state,
        verify_token_middleware::<TestState>,
      ))
  }

  #[test]
  fn bearer_token_extracted_from_header() {
    let mut headers = HeaderMap::new();
    headers.insert(
      header::AUTHORIZATION,
      HeaderValue::from_static("Bearer abc.def.ghi"),
    );
    assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));
  }

  #[test]
  fn non_bearer_authorization_is_ignored() {
    let mut headers = HeaderMap::new();
    headers.insert(
      header::AUTHORIZATION,
      HeaderValue::from_static("Basic dXNlcjpwYXNz"),
    );
    assert_eq!(bearer_token(&headers), None);
    assert_eq!(bearer_token(&HeaderMap::new()), None);
  }

  #[tokio::test]
  async fn valid_access_token_passes() {
    let req = Request::builder()
      .uri("/protected")
      .header("Authorization", format!("Bearer {}", mint(TokenKind::Access)))
      .body(Body::empty())
      .unwrap();

    let response = app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn missing_token_is_rejected() {
    let req = Request::builder()
      .uri("/protected")
      .body(Body::empty())
      .unwrap();

    let response = app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn refresh_token_is_rejected() {
    let req = Request::builder()
      .uri("/protected")
      .header(
        "Authorization",
        format!("Bearer {}", mint(TokenKind::Refresh)),
      )
      .body(Body::empty())
      .unwrap();

    let response = app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }
}
