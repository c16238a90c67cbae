pub mod ids;

pub use ids::{ChatId, MessageId, UserId};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered account. The realtime core only ever reads users; accounts
/// are created by the (out-of-process) registration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct User {
  pub id: UserId,
  pub username: String,
  pub email: String,
  #[sqlx(default)]
  #[serde(skip)]
  pub password_hash: Option<String>,
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
}

/// Minimal identity attached to an authenticated connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
  pub id: UserId,
  pub username: String,
  pub email: String,
  pub is_active: bool,
}

impl From<&User> for AuthUser {
  fn from(user: &User) -> Self {
    AuthUser {
      id: user.id,
      username: user.username.clone(),
      email: user.email.clone(),
      is_active: user.is_active,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ChatRoom {
  pub id: ChatId,
  pub name: Option<String>,
  pub is_group: bool,
  pub created_at: DateTime<Utc>,
}

/// Membership relation. A private chat has exactly two distinct
/// participants; (user_id, chat_id) is unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Participant {
  pub user_id: UserId,
  pub chat_id: ChatId,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Message {
  pub id: MessageId,
  pub chat_id: ChatId,
  pub sender_id: UserId,
  pub content: String,
  /// Most-recent reader timestamp. Per-reader first-read times live in
  /// [`MessageRead`].
  pub read_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub is_deleted: bool,
  pub is_edited: bool,
}

/// Per-recipient delivery receipt. One row per participant except the
/// sender; `delivered_at` stays null until the recipient's first socket
/// receives the message, and once set is never cleared.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct MessageDelivery {
  pub id: i64,
  pub message_id: MessageId,
  pub user_id: UserId,
  pub delivered_at: Option<DateTime<Utc>>,
}

/// First time a reader marked a message read. (message_id, user_id) unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct MessageRead {
  pub id: i64,
  pub message_id: MessageId,
  pub user_id: UserId,
  pub read_at: DateTime<Utc>,
}

/// Append-only edit history. The editor always equals the original sender.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct MessageEdit {
  pub id: i64,
  pub message_id: MessageId,
  pub user_id: UserId,
  pub old_content: String,
  pub new_content: String,
  pub edited_at: DateTime<Utc>,
}

/// Per-chat read cursor: the highest message id the user has read in the
/// chat. Advanced monotonically, never moved backwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ChatRead {
  pub id: i64,
  pub chat_id: ChatId,
  pub user_id: UserId,
  pub last_read_message_id: Option<MessageId>,
  pub read_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn auth_user_from_user_drops_password_hash() {
    let user = User {
      id: UserId(7),
      username: "alice".into(),
      email: "alice@example.com".into(),
      password_hash: Some("$argon2id$...".into()),
      is_active: true,
      created_at: Utc::now(),
    };

    let auth: AuthUser = (&user).into();
    assert_eq!(auth.id, UserId(7));
    assert_eq!(auth.username, "alice");

    // password_hash is serde-skipped on the entity itself too
    let json = serde_json::to_value(&user).unwrap();
    assert!(json.get("password_hash").is_none());
  }
}
