//! Online-status queries.
//!
//! Presence here is advisory: a user counts as online if they hold a socket
//! on this instance, or if any instance refreshed their presence flag
//! within its TTL.

use axum::{
  extract::{Query, State},
  Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use courier_core::{ChatId, TokenClaims, UserId};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OnlineUsersQuery {
  pub chat_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OnlineUserStatus {
  pub user_id: UserId,
  pub online: bool,
}

/// With `chat_id`: online status of that chat's members (caller must be a
/// member). Without: the caller's peers across all their chats.
pub async fn get_online_users_handler(
  State(state): State<AppState>,
  Extension(claims): Extension<TokenClaims>,
  Query(params): Query<OnlineUsersQuery>,
) -> Result<Json<Vec<OnlineUserStatus>>, AppError> {
  let user_id = claims.user_id;

  let members: Vec<UserId> = match params.chat_id {
    Some(chat_id) => {
      let chat_id = ChatId(chat_id);
      let is_member = state
        .chats
        .is_user_in_chat(user_id, chat_id)
        .await
        .map_err(AppError::from)?;
      if !is_member {
        return Err(AppError::Forbidden("not a member of this chat".to_string()));
      }
      members_of(&state, chat_id).await?
    }
    None => {
      let mut peers = BTreeSet::new();
      let chat_ids = state
        .chats
        .get_user_chat_ids(user_id)
        .await
        .map_err(AppError::from)?;
      for chat_id in chat_ids {
        peers.extend(members_of(&state, chat_id).await?);
      }
      peers.remove(&user_id);
      peers.into_iter().collect()
    }
  };

  let mut statuses = Vec::with_capacity(members.len());
  for member in members {
    let online =
      state.registry.is_connected(member) || state.sessions.is_online(member).await.unwrap_or(false);
    statuses.push(OnlineUserStatus {
      user_id: member,
      online,
    });
  }

  debug!(
    "user {} queried online status of {} users",
    user_id,
    statuses.len()
  );
  Ok(Json(statuses))
}

/// Mirror first; the database when the mirror is cold or unreachable.
async fn members_of(state: &AppState, chat_id: ChatId) -> Result<Vec<UserId>, AppError> {
  match state.sessions.chat_members(chat_id).await {
    Ok(members) if !members.is_empty() => Ok(members),
    _ => state
      .chats
      .get_chat_members(chat_id)
      .await
      .map_err(AppError::from),
  }
}
