//! Message state machine: create, list, deliver, read, edit, delete.
//!
//! Every operation is a single transaction, and the receipt updates are
//! guarded (`delivered_at IS NULL`, `read_at IS NULL`) so duplicated
//! fan-out across instances collapses to a no-op.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use courier_core::{
  ChatId, CoreError, Message, MessageDelivery, MessageEdit, MessageId, MessageRead, UserId,
};

pub const MAX_CONTENT_CHARS: usize = 2000;

const MESSAGE_COLUMNS: &str =
  "id, chat_id, sender_id, content, read_at, created_at, is_deleted, is_edited";

/// Trim and bound message content. Shared by create and edit.
pub fn validate_content(raw: &str) -> Result<&str, CoreError> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Err(CoreError::Validation(
      "message content must not be empty".to_string(),
    ));
  }
  if trimmed.chars().count() > MAX_CONTENT_CHARS {
    return Err(CoreError::Validation(format!(
      "message content exceeds {} characters",
      MAX_CONTENT_CHARS
    )));
  }
  Ok(trimmed)
}

pub struct MessageService {
  pool: Arc<PgPool>,
}

impl MessageService {
  pub fn new(pool: Arc<PgPool>) -> Self {
    Self { pool }
  }

  /// Persist a message plus one delivery stub per recipient (every
  /// participant except the sender, all with `delivered_at = NULL`).
  /// Publishing is the caller's job; the DB row is the source of truth and
  /// must exist before anything hits the bus.
  pub async fn send_message(
    &self,
    chat_id: ChatId,
    sender_id: UserId,
    content: &str,
  ) -> Result<Message, CoreError> {
    let content = validate_content(content)?;

    let mut tx = self.pool.begin().await?;

    let is_member: bool = sqlx::query_scalar(
      "SELECT EXISTS(SELECT 1 FROM participants WHERE user_id = $1 AND chat_id = $2)",
    )
    .bind(sender_id)
    .bind(chat_id)
    .fetch_one(&mut *tx)
    .await?;
    if !is_member {
      return Err(CoreError::Forbidden(
        "sender is not a participant of this chat".to_string(),
      ));
    }

    let message = sqlx::query_as::<_, Message>(&format!(
      "INSERT INTO messages (chat_id, sender_id, content) VALUES ($1, $2, $3) \
       RETURNING {}",
      MESSAGE_COLUMNS
    ))
    .bind(chat_id)
    .bind(sender_id)
    .bind(content)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
      "INSERT INTO message_deliveries (message_id, user_id) \
       SELECT $1, user_id FROM participants WHERE chat_id = $2 AND user_id <> $3",
    )
    .bind(message.id)
    .bind(chat_id)
    .bind(sender_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(message)
  }

  /// Newest-first page of a chat's messages. Soft-deleted rows are included
  /// (flagged) so clients can render tombstones.
  pub async fn get_chat_messages(
    &self,
    chat_id: ChatId,
    user_id: UserId,
    limit: i64,
    offset: i64,
  ) -> Result<Vec<Message>, CoreError> {
    let is_member: bool = sqlx::query_scalar(
      "SELECT EXISTS(SELECT 1 FROM participants WHERE user_id = $1 AND chat_id = $2)",
    )
    .bind(user_id)
    .bind(chat_id)
    .fetch_one(&*self.pool)
    .await?;
    if !is_member {
      return Err(CoreError::Forbidden(
        "not a participant of this chat".to_string(),
      ));
    }

    let limit = limit.clamp(1, 100);
    let offset = offset.max(0);

    let messages = sqlx::query_as::<_, Message>(&format!(
      "SELECT {} FROM messages WHERE chat_id = $1 \
       ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
      MESSAGE_COLUMNS
    ))
    .bind(chat_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&*self.pool)
    .await?;

    Ok(messages)
  }

  pub async fn get_message_by_id(
    &self,
    message_id: MessageId,
  ) -> Result<Option<Message>, CoreError> {
    let message = sqlx::query_as::<_, Message>(&format!(
      "SELECT {} FROM messages WHERE id = $1",
      MESSAGE_COLUMNS
    ))
    .bind(message_id)
    .fetch_optional(&*self.pool)
    .await?;
    Ok(message)
  }

  /// Set `delivered_at` once. Returns whether the row changed; the second
  /// and later calls are absorbed by the `IS NULL` guard.
  pub async fn mark_delivered(
    &self,
    message_id: MessageId,
    user_id: UserId,
  ) -> Result<bool, CoreError> {
    let result = sqlx::query(
      "UPDATE message_deliveries SET delivered_at = NOW() \
       WHERE message_id = $1 AND user_id = $2 AND delivered_at IS NULL",
    )
    .bind(message_id)
    .bind(user_id)
    .execute(&*self.pool)
    .await?;

    Ok(result.rows_affected() > 0)
  }

  /// Batch read marks. Only rows where the reader is a participant, is not
  /// the sender, and `read_at` is still null are touched; the per-reader
  /// first-read time lands in `message_reads`. Returns the number of
  /// messages whose `read_at` transitioned.
  pub async fn mark_messages_as_read(
    &self,
    message_ids: &[MessageId],
    reader_id: UserId,
  ) -> Result<u64, CoreError> {
    if message_ids.is_empty() {
      return Ok(0);
    }
    let ids: Vec<i64> = message_ids.iter().map(|id| id.inner()).collect();

    let mut tx = self.pool.begin().await?;

    let updated: Vec<i64> = sqlx::query_scalar(
      "UPDATE messages SET read_at = NOW() \
       WHERE id = ANY($1) \
         AND sender_id <> $2 \
         AND read_at IS NULL \
         AND chat_id IN (SELECT chat_id FROM participants WHERE user_id = $2) \
       RETURNING id",
    )
    .bind(&ids)
    .bind(reader_id)
    .fetch_all(&mut *tx)
    .await?;

    if !updated.is_empty() {
      sqlx::query(
        "INSERT INTO message_reads (message_id, user_id) \
         SELECT UNNEST($1::bigint[]), $2 \
         ON CONFLICT (message_id, user_id) DO NOTHING",
      )
      .bind(&updated)
      .bind(reader_id)
      .execute(&mut *tx)
      .await?;
    }

    tx.commit().await?;
    Ok(updated.len() as u64)
  }

  /// Soft delete. The row stays behind its id so receipts remain
  /// consistent; listings flag it instead of dropping it.
  pub async fn delete_message(
    &self,
    message_id: MessageId,
    user_id: UserId,
  ) -> Result<(), CoreError> {
    let mut tx = self.pool.begin().await?;

    let message = sqlx::query_as::<_, Message>(&format!(
      "SELECT {} FROM messages WHERE id = $1 AND is_deleted = FALSE FOR UPDATE",
      MESSAGE_COLUMNS
    ))
    .bind(message_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("message {} not found", message_id)))?;

    if message.sender_id != user_id {
      return Err(CoreError::Forbidden(
        "only the sender may delete a message".to_string(),
      ));
    }

    sqlx::query("UPDATE messages SET is_deleted = TRUE WHERE id = $1")
      .bind(message_id)
      .execute(&mut *tx)
      .await?;

    tx.commit().await?;
    Ok(())
  }

  /// Edit with append-only history. Returns the updated message and the
  /// history row's `edited_at` so the caller can publish the edit envelope
  /// verbatim.
  pub async fn edit_message(
    &self,
    message_id: MessageId,
    user_id: UserId,
    new_content: &str,
  ) -> Result<(Message, DateTime<Utc>), CoreError> {
    let new_content = validate_content(new_content)?;

    let mut tx = self.pool.begin().await?;

    let message = sqlx::query_as::<_, Message>(&format!(
      "SELECT {} FROM messages WHERE id = $1 FOR UPDATE",
      MESSAGE_COLUMNS
    ))
    .bind(message_id)
    .fetch_optional(&mut *tx)
    .await?
    .filter(|m| !m.is_deleted)
    .ok_or_else(|| CoreError::NotFound(format!("message {} not found", message_id)))?;

    if message.sender_id != user_id {
      return Err(CoreError::Forbidden(
        "only the sender may edit a message".to_string(),
      ));
    }

    let edited_at: DateTime<Utc> = sqlx::query_scalar(
      "INSERT INTO message_edits (message_id, user_id, old_content, new_content) \
       VALUES ($1, $2, $3, $4) RETURNING edited_at",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(&message.content)
    .bind(new_content)
    .fetch_one(&mut *tx)
    .await?;

    let updated = sqlx::query_as::<_, Message>(&format!(
      "UPDATE messages SET content = $2, is_edited = TRUE WHERE id = $1 RETURNING {}",
      MESSAGE_COLUMNS
    ))
    .bind(message_id)
    .bind(new_content)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((updated, edited_at))
  }

  /// Per-recipient delivery receipts of one message.
  pub async fn get_deliveries(
    &self,
    message_id: MessageId,
  ) -> Result<Vec<MessageDelivery>, CoreError> {
    let deliveries = sqlx::query_as::<_, MessageDelivery>(
      "SELECT id, message_id, user_id, delivered_at FROM message_deliveries \
       WHERE message_id = $1 ORDER BY user_id",
    )
    .bind(message_id)
    .fetch_all(&*self.pool)
    .await?;
    Ok(deliveries)
  }

  /// Per-reader first-read receipts of one message.
  pub async fn get_reads(&self, message_id: MessageId) -> Result<Vec<MessageRead>, CoreError> {
    let reads = sqlx::query_as::<_, MessageRead>(
      "SELECT id, message_id, user_id, read_at FROM message_reads \
       WHERE message_id = $1 ORDER BY user_id",
    )
    .bind(message_id)
    .fetch_all(&*self.pool)
    .await?;
    Ok(reads)
  }

  /// Full edit history of a message, oldest first.
  pub async fn get_edit_history(
    &self,
    message_id: MessageId,
  ) -> Result<Vec<MessageEdit>, CoreError> {
    let edits = sqlx::query_as::<_, MessageEdit>(
      "SELECT id, message_id, user_id, old_content, new_content, edited_at \
       FROM message_edits WHERE message_id = $1 ORDER BY edited_at, id",
    )
    .bind(message_id)
    .fetch_all(&*self.pool)
    .await?;
    Ok(edits)
  }

  /// Advance the per-chat read cursor; it never moves backwards.
  pub async fn mark_chat_read(
    &self,
    chat_id: ChatId,
    user_id: UserId,
    last_read_message_id: MessageId,
  ) -> Result<(), CoreError> {
    sqlx::query(
      "INSERT INTO chat_reads (chat_id, user_id, last_read_message_id) \
       VALUES ($1, $2, $3) \
       ON CONFLICT (chat_id, user_id) DO UPDATE \
       SET last_read_message_id = EXCLUDED.last_read_message_id, read_at = NOW() \
       WHERE chat_reads.last_read_message_id IS NULL \
          OR EXCLUDED.last_read_message_id > chat_reads.last_read_message_id",
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(last_read_message_id)
    .execute(&*self.pool)
    .await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn content_is_trimmed() {
    assert_eq!(validate_content("  hi  ").unwrap(), "hi");
  }

  #[test]
  fn empty_content_rejected() {
    assert!(matches!(
      validate_content(""),
      Err(CoreError::Validation(_))
    ));
    // whitespace-only trims to empty
    assert!(matches!(
      validate_content("   \n\t "),
      Err(CoreError::Validation(_))
    ));
  }

  #[test]
  fn content_length_boundaries() {
    let exactly_max = "x".repeat(MAX_CONTENT_CHARS);
    assert!(validate_content(&exactly_max).is_ok());

    let one_over = "x".repeat(MAX_CONTENT_CHARS + 1);
    assert!(matches!(
      validate_content(&one_over),
      Err(CoreError::Validation(_))
    ));

    assert_eq!(validate_content("x").unwrap(), "x");
  }

  #[test]
  fn length_is_counted_in_chars_not_bytes() {
    // 2000 multibyte characters are within bounds even though the byte
    // length exceeds 2000
    let cyrillic = "й".repeat(MAX_CONTENT_CHARS);
    assert!(cyrillic.len() > MAX_CONTENT_CHARS);
    assert!(validate_content(&cyrillic).is_ok());
  }
}
