//! Membership and user reads.
//!
//! Chats and participants are created by the chat REST service; the
//! realtime core only reads them, for fan-out targets and authorization.

use sqlx::PgPool;
use std::sync::Arc;

use courier_core::{ChatId, CoreError, User, UserId};

pub struct ChatRepository {
  pool: Arc<PgPool>,
}

impl ChatRepository {
  pub fn new(pool: Arc<PgPool>) -> Self {
    Self { pool }
  }

  pub async fn get_chat_members(&self, chat_id: ChatId) -> Result<Vec<UserId>, CoreError> {
    let members: Vec<UserId> =
      sqlx::query_scalar("SELECT user_id FROM participants WHERE chat_id = $1")
        .bind(chat_id)
        .fetch_all(&*self.pool)
        .await?;
    Ok(members)
  }

  pub async fn get_user_chat_ids(&self, user_id: UserId) -> Result<Vec<ChatId>, CoreError> {
    let chat_ids: Vec<ChatId> =
      sqlx::query_scalar("SELECT chat_id FROM participants WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await?;
    Ok(chat_ids)
  }

  pub async fn is_user_in_chat(&self, user_id: UserId, chat_id: ChatId) -> Result<bool, CoreError> {
    let is_member: bool = sqlx::query_scalar(
      "SELECT EXISTS(SELECT 1 FROM participants WHERE user_id = $1 AND chat_id = $2)",
    )
    .bind(user_id)
    .bind(chat_id)
    .fetch_one(&*self.pool)
    .await?;
    Ok(is_member)
  }

  /// Resolve a token subject to an account. `None` means the subject is
  /// unknown and the connection must be refused.
  pub async fn fetch_user(&self, user_id: UserId) -> Result<Option<User>, CoreError> {
    let user = sqlx::query_as::<_, User>(
      "SELECT id, username, email, password_hash, is_active, created_at \
       FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&*self.pool)
    .await?;
    Ok(user)
  }
}
