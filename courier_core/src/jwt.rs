//! Bearer-token verification.
//!
//! The realtime core never mints tokens; the auth service does that. This
//! module only checks signature, expiry and the `type` claim, and extracts
//! the subject. HS256 by default, configurable.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::UserId;

/// Clock skew allowance when validating `exp`.
const JWT_LEEWAY: u64 = 60;

/// Typed verification failures. `UnknownSubject` is produced by the caller
/// after a successful decode, when the subject does not resolve to a live
/// user.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthError {
  #[error("malformed token")]
  Malformed,

  #[error("expired token")]
  Expired,

  #[error("wrong token type")]
  WrongType,

  #[error("unknown subject")]
  UnknownSubject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
  Access,
  Refresh,
}

/// Wire-level claims. `sub` carries the user id as a string, `jti` is only
/// present on refresh tokens (it keys the revocation allowlist).
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
  pub sub: String,
  pub exp: usize,
  pub iat: usize,
  #[serde(rename = "type")]
  pub kind: TokenKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub jti: Option<String>,
}

/// What a successful verification yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
  pub user_id: UserId,
  pub kind: TokenKind,
  pub jti: Option<String>,
}

#[derive(Clone)]
pub struct TokenManager {
  decoding_key: DecodingKey,
  validation: Validation,
}

impl TokenManager {
  pub fn new(secret: &str, algorithm: Algorithm) -> Self {
    let mut validation = Validation::new(algorithm);
    validation.leeway = JWT_LEEWAY;
    validation.validate_aud = false;

    Self {
      decoding_key: DecodingKey::from_secret(secret.as_bytes()),
      validation,
    }
  }

  /// Decode and validate a token, requiring the given `type` claim.
  pub fn verify(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, AuthError> {
    let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
      match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Malformed,
      }
    })?;

    let claims = data.claims;
    if claims.kind != expected {
      return Err(AuthError::WrongType);
    }

    let user_id: i64 = claims.sub.parse().map_err(|_| AuthError::Malformed)?;

    Ok(TokenClaims {
      user_id: UserId(user_id),
      kind: claims.kind,
      jti: claims.jti,
    })
  }

  /// Realtime connections only ever present access tokens.
  pub fn verify_access(&self, token: &str) -> Result<TokenClaims, AuthError> {
    self.verify(token, TokenKind::Access)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use jsonwebtoken::{encode, EncodingKey, Header};

  const SECRET: &str = "unit-test-secret-at-least-32-bytes!!";

  fn mint(kind: TokenKind, sub: &str, exp_offset: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
      sub: sub.to_string(),
      exp: (now + exp_offset) as usize,
      iat: now as usize,
      kind,
      jti: matches!(kind, TokenKind::Refresh).then(|| "jti-1".to_string()),
    };
    encode(
      &Header::default(),
      &claims,
      &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
  }

  fn manager() -> TokenManager {
    TokenManager::new(SECRET, Algorithm::HS256)
  }

  #[test]
  fn valid_access_token_yields_user_id() {
    let token = mint(TokenKind::Access, "42", 600);
    let claims = manager().verify_access(&token).unwrap();
    assert_eq!(claims.user_id, UserId(42));
    assert_eq!(claims.kind, TokenKind::Access);
    assert_eq!(claims.jti, None);
  }

  #[test]
  fn refresh_token_rejected_on_realtime_path() {
    let token = mint(TokenKind::Refresh, "42", 600);
    assert_eq!(
      manager().verify_access(&token).unwrap_err(),
      AuthError::WrongType
    );
  }

  #[test]
  fn refresh_token_verifies_with_jti() {
    let token = mint(TokenKind::Refresh, "42", 600);
    let claims = manager().verify(&token, TokenKind::Refresh).unwrap();
    assert_eq!(claims.jti.as_deref(), Some("jti-1"));
  }

  #[test]
  fn expired_token_is_typed() {
    // Past the 60s leeway
    let token = mint(TokenKind::Access, "42", -120);
    assert_eq!(
      manager().verify_access(&token).unwrap_err(),
      AuthError::Expired
    );
  }

  #[test]
  fn garbage_is_malformed() {
    assert_eq!(
      manager().verify_access("not.a.jwt").unwrap_err(),
      AuthError::Malformed
    );
  }

  #[test]
  fn wrong_secret_is_malformed() {
    let token = mint(TokenKind::Access, "42", 600);
    let other = TokenManager::new("another-secret-which-is-also-long!!!", Algorithm::HS256);
    assert_eq!(other.verify_access(&token).unwrap_err(), AuthError::Malformed);
  }

  #[test]
  fn non_numeric_subject_is_malformed() {
    let token = mint(TokenKind::Access, "alice", 600);
    assert_eq!(
      manager().verify_access(&token).unwrap_err(),
      AuthError::Malformed
    );
  }
}
