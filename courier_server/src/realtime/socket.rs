//! WebSocket endpoint: authentication, connect sequence, inbound loop.
//!
//! Auth happens at connect time from the `Authorization: Bearer` header,
//! with a `?token=` query parameter as the legacy fallback. A failed
//! handshake still upgrades, then closes with 1008 so the client sees a
//! policy-violation code rather than a broken upgrade.

use axum::{
  extract::{
    ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    Query, State,
  },
  http::HeaderMap,
  response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_core::{AuthError, AuthUser, ChatId, CoreError, MessageId, UserId};

use crate::error::AppError;
use crate::events::ChatEvent;
use crate::middleware::bearer_token;
use crate::realtime::frames::{ClientFrame, ServerFrame};
use crate::realtime::registry::{ConnectionHandle, SocketCommand, CHANNEL_CAPACITY};
use crate::state::AppState;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_POLICY: u16 = 1008;
const CLOSE_INTERNAL: u16 = 1011;

#[derive(Deserialize)]
pub struct WsQuery {
  #[serde(default)]
  token: Option<String>,
}

pub async fn ws_handler(
  State(state): State<AppState>,
  ws: WebSocketUpgrade,
  headers: HeaderMap,
  Query(query): Query<WsQuery>,
) -> Response {
  let token = bearer_token(&headers).or(query.token);
  ws.on_upgrade(move |socket| handle_socket(state, socket, token))
}

async fn handle_socket(state: AppState, socket: WebSocket, token: Option<String>) {
  match authenticate(&state, token.as_deref()).await {
    Ok(user) => run_connection(state, socket, user).await,
    Err(err) => {
      warn!("websocket authentication failed: {}", err);
      let code = match err {
        AppError::Unauthenticated(_) => CLOSE_POLICY,
        _ => CLOSE_INTERNAL,
      };
      close_socket(socket, code).await;
    }
  }
}

/// Only access tokens open realtime connections; a decoded subject that no
/// longer resolves to an account is refused as unknown.
async fn authenticate(state: &AppState, token: Option<&str>) -> Result<AuthUser, AppError> {
  let token = token.ok_or(AuthError::Malformed)?;
  let claims = state.token_manager.verify_access(token)?;

  let user = state
    .chats
    .fetch_user(claims.user_id)
    .await
    .map_err(AppError::from)?
    .ok_or(AuthError::UnknownSubject)?;

  if !user.is_active {
    warn!("inactive user {} opened a realtime connection", user.id);
  }

  Ok(AuthUser::from(&user))
}

async fn close_socket(mut socket: WebSocket, code: u16) {
  let _ = socket
    .send(Message::Close(Some(CloseFrame {
      code,
      reason: Utf8Bytes::from_static(""),
    })))
    .await;
}

async fn run_connection(state: AppState, socket: WebSocket, user: AuthUser) {
  let user_id = user.id;
  let session_id = Uuid::new_v4();
  let (mut sink, mut stream) = socket.split();
  let (tx, mut rx) = mpsc::channel::<SocketCommand>(CHANNEL_CAPACITY);

  // The writer task owns the sink; everything outbound funnels through the
  // channel so the registry and the inbound loop never touch the socket
  // concurrently.
  let writer = tokio::spawn(async move {
    while let Some(command) = rx.recv().await {
      match command {
        SocketCommand::Frame(json) => {
          if sink.send(Message::Text(json.into())).await.is_err() {
            break;
          }
        }
        SocketCommand::Close(code) => {
          let _ = sink
            .send(Message::Close(Some(CloseFrame {
              code,
              reason: Utf8Bytes::from_static(""),
            })))
            .await;
          break;
        }
      }
    }
    let _ = sink.close().await;
  });

  // Connect sequence: displace -> mirror memberships -> presence ->
  // greeting -> offline drain, then hand over to the receive loop.
  let handle = ConnectionHandle::new(session_id, tx.clone());
  if let Some(displaced) = state.registry.register(user_id, handle) {
    displaced.send(SocketCommand::Close(CLOSE_NORMAL));
  }

  if let Err(e) = state.membership.sync_chat_memberships(user_id).await {
    warn!("membership sync failed for user {}: {}", user_id, e);
  }
  if let Err(e) = state.sessions.mark_online(user_id).await {
    warn!("failed to mark user {} online: {}", user_id, e);
  }
  if let Err(e) = state.sessions.register_session(user_id, session_id).await {
    warn!("failed to register session for user {}: {}", user_id, e);
  }

  send_frame(&tx, &ServerFrame::connected(user_id)).await;

  state.delivery.deliver_pending(user_id, &tx).await;

  info!("user {} connected (session {})", user_id, session_id);

  receive_loop(&state, user_id, &tx, &mut stream).await;

  // Idempotent teardown. The session guard keeps a displaced socket from
  // marking its successor offline.
  if state.registry.disconnect(user_id, session_id) {
    if let Err(e) = state.sessions.mark_offline(user_id).await {
      warn!("failed to mark user {} offline: {}", user_id, e);
    }
  }
  if let Err(e) = state.sessions.remove_session(user_id, session_id).await {
    warn!("failed to remove session for user {}: {}", user_id, e);
  }

  drop(tx);
  let _ = writer.await;
  info!("user {} disconnected (session {})", user_id, session_id);
}

/// Liveness bookkeeping: a ping goes out on every receive timeout, and the
/// connection dies after `max_missed` consecutive silent intervals. Any
/// inbound frame counts as life.
struct Liveness {
  missed: u32,
  max_missed: u32,
}

impl Liveness {
  fn new(max_missed: u32) -> Self {
    Self {
      missed: 0,
      max_missed,
    }
  }

  /// Returns true when the connection should be closed.
  fn on_timeout(&mut self) -> bool {
    self.missed += 1;
    self.missed >= self.max_missed
  }

  fn on_frame(&mut self) {
    self.missed = 0;
  }
}

async fn receive_loop(
  state: &AppState,
  user_id: UserId,
  tx: &mpsc::Sender<SocketCommand>,
  stream: &mut futures::stream::SplitStream<WebSocket>,
) {
  let ping_interval = Duration::from_secs(state.config.realtime.ping_interval_secs);
  let refresh_every = Duration::from_secs((state.config.realtime.online_ttl_secs / 3).max(1));
  let mut liveness = Liveness::new(state.config.realtime.max_missed_pongs);
  let mut last_refresh = Instant::now();

  loop {
    match timeout(ping_interval, stream.next()).await {
      Err(_elapsed) => {
        send_frame(tx, &ServerFrame::Ping).await;
        if liveness.on_timeout() {
          info!(
            "user {} missed {} pings, closing connection",
            user_id, liveness.missed
          );
          let _ = tx.send(SocketCommand::Close(CLOSE_NORMAL)).await;
          break;
        }
      }
      Ok(None) => break,
      Ok(Some(Err(e))) => {
        debug!("socket error for user {}: {}", user_id, e);
        break;
      }
      Ok(Some(Ok(message))) => match message {
        Message::Text(text) => {
          liveness.on_frame();
          dispatch_frame(state, user_id, tx, text.as_str()).await;
        }
        Message::Close(_) => break,
        Message::Ping(_) | Message::Pong(_) => liveness.on_frame(),
        Message::Binary(_) => debug!("ignoring binary frame from user {}", user_id),
      },
    }

    // Keep the advisory presence flag ahead of its TTL while the socket
    // lives, whether or not the peer is chatty.
    if last_refresh.elapsed() >= refresh_every {
      if let Err(e) = state.sessions.refresh_presence(user_id).await {
        warn!("presence refresh failed for user {}: {}", user_id, e);
      }
      last_refresh = Instant::now();
    }
  }
}

async fn dispatch_frame(
  state: &AppState,
  user_id: UserId,
  tx: &mpsc::Sender<SocketCommand>,
  raw: &str,
) {
  let frame = match serde_json::from_str::<ClientFrame>(raw) {
    Ok(frame) => frame,
    Err(e) => {
      debug!("malformed frame from user {}: {}", user_id, e);
      send_error(tx, "malformed frame").await;
      return;
    }
  };

  match frame {
    ClientFrame::Pong => {}
    ClientFrame::Message { chat_id, content } => {
      handle_chat_message(state, user_id, chat_id, &content, tx).await;
    }
    ClientFrame::Read { message_ids } => {
      handle_read(state, user_id, &message_ids, tx).await;
    }
    ClientFrame::EditMessage {
      message_id, content, ..
    } => {
      handle_edit(state, user_id, message_id, &content, tx).await;
    }
    ClientFrame::Unknown => debug!("unknown frame type from user {}", user_id),
  }
}

async fn handle_chat_message(
  state: &AppState,
  user_id: UserId,
  chat_id: ChatId,
  content: &str,
  tx: &mpsc::Sender<SocketCommand>,
) {
  match state.sessions.rate_check(user_id).await {
    Ok(true) => {}
    Ok(false) => {
      send_error(tx, "rate_limited").await;
      return;
    }
    // Degraded store: let the message through rather than fail the user.
    Err(e) => warn!("rate check unavailable for user {}: {}", user_id, e),
  }

  let message = match state.messages.send_message(chat_id, user_id, content).await {
    Ok(message) => message,
    Err(CoreError::Validation(msg)) | Err(CoreError::Forbidden(msg)) => {
      send_error(tx, msg).await;
      return;
    }
    Err(e) => {
      tracing::error!("failed to store message from user {}: {}", user_id, e);
      send_error(tx, "failed to store message").await;
      return;
    }
  };

  // No local fan-out: the bus round-trip keeps the single-instance and
  // multi-instance paths identical. The row is committed, so a failed
  // publish only delays the recipients until history fetch.
  if let Err(e) = state
    .sessions
    .publish_to_chat(chat_id, &ChatEvent::message(&message))
    .await
  {
    metrics::counter!("bus_publish_failures_total").increment(1);
    warn!("bus publish failed for message {}: {}", message.id, e);
  }
}

async fn handle_read(
  state: &AppState,
  user_id: UserId,
  message_ids: &[MessageId],
  tx: &mpsc::Sender<SocketCommand>,
) {
  if message_ids.is_empty() {
    return;
  }

  match state
    .messages
    .mark_messages_as_read(message_ids, user_id)
    .await
  {
    Ok(count) => debug!("user {} marked {} messages read", user_id, count),
    Err(e) => {
      tracing::error!("batch read failed for user {}: {}", user_id, e);
      send_error(tx, "failed to mark messages read").await;
    }
  }
}

async fn handle_edit(
  state: &AppState,
  user_id: UserId,
  message_id: MessageId,
  content: &str,
  tx: &mpsc::Sender<SocketCommand>,
) {
  match state.messages.edit_message(message_id, user_id, content).await {
    Ok((message, edited_at)) => {
      // Fans out over the bus exactly like a creation.
      let event = ChatEvent::MessageEdited {
        chat_id: message.chat_id,
        sender_id: user_id,
        message_id,
        new_content: message.content,
        edited_at,
      };
      if let Err(e) = state.sessions.publish_to_chat(event.chat_id(), &event).await {
        metrics::counter!("bus_publish_failures_total").increment(1);
        warn!("bus publish failed for edit of message {}: {}", message_id, e);
      }
    }
    Err(CoreError::NotFound(msg))
    | Err(CoreError::Forbidden(msg))
    | Err(CoreError::Validation(msg)) => {
      send_error(tx, msg).await;
    }
    Err(e) => {
      tracing::error!(
        "edit of message {} by user {} failed: {}",
        message_id,
        user_id,
        e
      );
      send_error(tx, "failed to edit message").await;
    }
  }
}

async fn send_frame(tx: &mpsc::Sender<SocketCommand>, frame: &ServerFrame) {
  match serde_json::to_string(frame) {
    Ok(json) => {
      let _ = tx.send(SocketCommand::Frame(json)).await;
    }
    Err(e) => warn!("failed to serialize server frame: {}", e),
  }
}

async fn send_error(tx: &mpsc::Sender<SocketCommand>, message: impl Into<String>) {
  send_frame(tx, &ServerFrame::error(message)).await;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn liveness_closes_after_max_missed() {
    let mut liveness = Liveness::new(3);
    assert!(!liveness.on_timeout());
    assert!(!liveness.on_timeout());
    assert!(liveness.on_timeout());
  }

  #[test]
  fn any_frame_resets_liveness() {
    let mut liveness = Liveness::new(3);
    assert!(!liveness.on_timeout());
    assert!(!liveness.on_timeout());
    liveness.on_frame();
    // counter restarted: two more silent intervals still survive
    assert!(!liveness.on_timeout());
    assert!(!liveness.on_timeout());
    assert!(liveness.on_timeout());
  }
}
