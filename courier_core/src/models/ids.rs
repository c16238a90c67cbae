//! Newtype wrappers for the ID types in the system
//!
//! These types provide type safety and prevent mixing up different kinds of IDs

use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;

/// User ID newtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Chat ID newtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Message ID newtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for ChatId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for MessageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<i64> for UserId {
  fn from(id: i64) -> Self {
    UserId(id)
  }
}

impl From<i64> for ChatId {
  fn from(id: i64) -> Self {
    ChatId(id)
  }
}

impl From<i64> for MessageId {
  fn from(id: i64) -> Self {
    MessageId(id)
  }
}

impl From<UserId> for i64 {
  fn from(id: UserId) -> Self {
    id.0
  }
}

impl From<ChatId> for i64 {
  fn from(id: ChatId) -> Self {
    id.0
  }
}

impl From<MessageId> for i64 {
  fn from(id: MessageId) -> Self {
    id.0
  }
}

impl UserId {
  pub fn new(id: i64) -> Self {
    UserId(id)
  }

  pub fn inner(&self) -> i64 {
    self.0
  }
}

impl ChatId {
  pub fn new(id: i64) -> Self {
    ChatId(id)
  }

  pub fn inner(&self) -> i64 {
    self.0
  }
}

impl MessageId {
  pub fn new(id: i64) -> Self {
    MessageId(id)
  }

  pub fn inner(&self) -> i64 {
    self.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn id_conversion_round_trips() {
    let user_id = UserId::from(456);
    let raw: i64 = user_id.into();
    assert_eq!(raw, 456);
  }

  #[test]
  fn id_display_is_bare_number() {
    assert_eq!(format!("{}", ChatId::new(789)), "789");
  }

  #[test]
  fn serde_is_transparent() {
    let id = MessageId(42);
    assert_eq!(serde_json::to_string(&id).unwrap(), "42");
    let back: MessageId = serde_json::from_str("42").unwrap();
    assert_eq!(back, id);
  }
}
