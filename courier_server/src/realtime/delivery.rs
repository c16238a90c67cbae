//! Fan-out of bus events to recipients.
//!
//! Invoked by the subscriber for every arrival on a chat channel. Members
//! come from the session-store mirror; each one either gets a local socket
//! send (then a guarded mark-delivered) or an offline enqueue. A failing
//! local send demotes the socket to "not connected" and the event goes to
//! the offline queue instead.

use metrics::counter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use courier_core::{ChatId, UserId};

use crate::events::ChatEvent;
use crate::realtime::registry::{ConnectionRegistry, SocketCommand};
use crate::services::{ChatRepository, MessageService, SessionStore};

pub struct DeliveryEngine {
  registry: Arc<ConnectionRegistry>,
  sessions: Arc<SessionStore>,
  messages: Arc<MessageService>,
  chats: Arc<ChatRepository>,
}

impl DeliveryEngine {
  pub fn new(
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionStore>,
    messages: Arc<MessageService>,
    chats: Arc<ChatRepository>,
  ) -> Self {
    Self {
      registry,
      sessions,
      messages,
      chats,
    }
  }

  /// Deliver one bus event to every member of its chat except the sender.
  pub async fn handle_event(&self, chat_id: ChatId, event: ChatEvent) {
    // Degraded store mode: fall back to the DB participant list so local
    // delivery survives a Redis outage, but skip offline enqueueing.
    let (members, offline_available) = match self.sessions.chat_members(chat_id).await {
      Ok(members) => (members, true),
      Err(store_err) => {
        warn!(
          "chat_members mirror unreachable for chat {} ({}); using database member list",
          chat_id, store_err
        );
        counter!("delivery_store_degraded_total").increment(1);
        match self.chats.get_chat_members(chat_id).await {
          Ok(members) => (members, false),
          Err(db_err) => {
            error!("cannot enumerate members of chat {}: {}", chat_id, db_err);
            return;
          }
        }
      }
    };

    if members.is_empty() {
      return;
    }

    let payload = match serde_json::to_string(&event) {
      Ok(payload) => payload,
      Err(e) => {
        error!("failed to serialize event for chat {}: {}", chat_id, e);
        return;
      }
    };

    let sender_id = event.sender_id();
    for user_id in members {
      // No local echo: the originator learns success from the send path.
      if user_id == sender_id {
        continue;
      }

      if self.registry.send_raw(user_id, payload.clone()) {
        counter!("delivery_local_sends_total").increment(1);
        if let Some(message_id) = event.delivery_message_id() {
          // Guarded by delivered_at IS NULL; duplicate arrivals across
          // instances collapse here.
          if let Err(e) = self.messages.mark_delivered(message_id, user_id).await {
            error!(
              "failed to mark message {} delivered to user {}: {}",
              message_id, user_id, e
            );
          }
        }
      } else if offline_available {
        counter!("delivery_offline_enqueued_total").increment(1);
        if let Err(e) = self.sessions.store_offline(user_id, &payload).await {
          warn!(
            "failed to queue offline event for user {}: {}",
            user_id, e
          );
        }
      } else {
        debug!(
          "store degraded: skipping offline enqueue for user {} in chat {}",
          user_id, chat_id
        );
      }
    }
  }

  /// Drain the user's offline queue into a freshly connected socket, oldest
  /// first. If the socket dies mid-drain the unsent remainder goes back to
  /// the queue, so what is enqueued afterwards is exactly what was never
  /// successfully sent.
  pub async fn deliver_pending(&self, user_id: UserId, sender: &mpsc::Sender<SocketCommand>) {
    let pending = match self.sessions.drain_offline(user_id).await {
      Ok(pending) => pending,
      Err(e) => {
        warn!("failed to drain offline queue for user {}: {}", user_id, e);
        return;
      }
    };
    if pending.is_empty() {
      return;
    }

    debug!(
      "delivering {} queued events to user {}",
      pending.len(),
      user_id
    );

    let mut undelivered: Option<usize> = None;
    for (index, payload) in pending.iter().enumerate() {
      if sender
        .send(SocketCommand::Frame(payload.clone()))
        .await
        .is_err()
      {
        undelivered = Some(index);
        break;
      }

      counter!("delivery_offline_drained_total").increment(1);
      if let Ok(event) = serde_json::from_str::<ChatEvent>(payload) {
        if let Some(message_id) = event.delivery_message_id() {
          if let Err(e) = self.messages.mark_delivered(message_id, user_id).await {
            error!(
              "failed to mark queued message {} delivered to user {}: {}",
              message_id, user_id, e
            );
          }
        }
      }
    }

    if let Some(index) = undelivered {
      warn!(
        "socket of user {} died during offline drain; re-queueing {} events",
        user_id,
        pending.len() - index
      );
      for payload in &pending[index..] {
        if let Err(e) = self.sessions.store_offline(user_id, payload).await {
          warn!("failed to re-queue offline event for user {}: {}", user_id, e);
        }
      }
    }
  }
}
