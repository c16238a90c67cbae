//! On-connect membership sync.
//!
//! Materializes the user's chat ids from persistent storage into the
//! `chat_members:{cid}` mirror so fan-out can enumerate targets without a
//! database round-trip per publish. Stale mirror entries are tolerated by
//! the delivery engine.

use std::sync::Arc;
use tracing::{debug, warn};

use courier_core::UserId;

use crate::error::AppError;
use crate::services::{ChatRepository, SessionStore};

#[derive(Clone)]
pub struct MembershipSync {
  chats: Arc<ChatRepository>,
  sessions: Arc<SessionStore>,
}

impl MembershipSync {
  pub fn new(chats: Arc<ChatRepository>, sessions: Arc<SessionStore>) -> Self {
    Self { chats, sessions }
  }

  /// Returns how many chats were mirrored. A store failure on one chat does
  /// not abort the rest; the mirror self-heals on the next connect.
  pub async fn sync_chat_memberships(&self, user_id: UserId) -> Result<usize, AppError> {
    let chat_ids = self
      .chats
      .get_user_chat_ids(user_id)
      .await
      .map_err(AppError::from)?;

    let mut synced = 0;
    for chat_id in &chat_ids {
      match self.sessions.add_user_to_chat(user_id, *chat_id).await {
        Ok(()) => synced += 1,
        Err(e) => warn!(
          "failed to mirror membership of user {} in chat {}: {}",
          user_id, chat_id, e
        ),
      }
    }

    debug!("synced {}/{} chats for user {}", synced, chat_ids.len(), user_id);
    Ok(synced)
  }
}
