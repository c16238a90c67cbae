//! # Courier Core
//!
//! Shared building blocks of the courier realtime chat backend: entity
//! records, typed ids, the core error enum, and bearer-token verification.
//! Everything with I/O lives in `courier_server`.

pub mod error;
pub mod jwt;
pub mod models;

pub use error::CoreError;
pub use jwt::{AuthError, TokenClaims, TokenKind, TokenManager};
pub use models::{
  AuthUser, ChatId, ChatRead, ChatRoom, Message, MessageDelivery, MessageEdit, MessageId,
  MessageRead, Participant, User, UserId,
};
