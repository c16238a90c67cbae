//! Bus envelopes.
//!
//! One pub/sub channel per chat (`chat:{id}`). The envelope published on the
//! bus is byte-for-byte the frame a recipient socket receives, so the
//! single-instance and multi-instance delivery paths are identical.

use chrono::{DateTime, Utc};
use courier_core::{ChatId, Message, MessageId, UserId};
use serde::{Deserialize, Serialize};

pub const CHAT_CHANNEL_PREFIX: &str = "chat:";

/// Channel pattern the per-instance subscriber listens on.
pub const CHAT_CHANNEL_PATTERN: &str = "chat:*";

pub fn chat_channel(chat_id: ChatId) -> String {
  format!("{}{}", CHAT_CHANNEL_PREFIX, chat_id)
}

/// Parse `chat:123` back into a chat id. Returns `None` for foreign
/// channels, which the subscriber skips.
pub fn chat_id_from_channel(channel: &str) -> Option<ChatId> {
  channel
    .strip_prefix(CHAT_CHANNEL_PREFIX)?
    .parse::<i64>()
    .ok()
    .map(ChatId)
}

/// Wire view of a message inside a `message` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageView {
  pub id: MessageId,
  pub chat_id: ChatId,
  pub sender_id: UserId,
  pub content: String,
  pub created_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub read_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub is_deleted: bool,
}

impl From<&Message> for MessageView {
  fn from(message: &Message) -> Self {
    MessageView {
      id: message.id,
      chat_id: message.chat_id,
      sender_id: message.sender_id,
      content: message.content.clone(),
      created_at: message.created_at,
      read_at: message.read_at,
      is_deleted: message.is_deleted,
    }
  }
}

/// Self-describing event carried on a chat channel. Routing happens on the
/// channel name; `chat_id` in the body keeps stored copies (offline queue)
/// self-contained.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
  Message {
    chat_id: ChatId,
    message: MessageView,
  },
  MessageEdited {
    chat_id: ChatId,
    sender_id: UserId,
    message_id: MessageId,
    new_content: String,
    edited_at: DateTime<Utc>,
  },
}

impl ChatEvent {
  pub fn message(message: &Message) -> Self {
    ChatEvent::Message {
      chat_id: message.chat_id,
      message: message.into(),
    }
  }

  pub fn chat_id(&self) -> ChatId {
    match self {
      ChatEvent::Message { chat_id, .. } => *chat_id,
      ChatEvent::MessageEdited { chat_id, .. } => *chat_id,
    }
  }

  /// The originator, skipped during fan-out (no local echo).
  pub fn sender_id(&self) -> UserId {
    match self {
      ChatEvent::Message { message, .. } => message.sender_id,
      ChatEvent::MessageEdited { sender_id, .. } => *sender_id,
    }
  }

  /// Id to mark delivered on a successful send. Edits carry no delivery
  /// receipts of their own.
  pub fn delivery_message_id(&self) -> Option<MessageId> {
    match self {
      ChatEvent::Message { message, .. } => Some(message.id),
      ChatEvent::MessageEdited { .. } => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_message() -> Message {
    Message {
      id: MessageId(100),
      chat_id: ChatId(10),
      sender_id: UserId(1),
      content: "hi".to_string(),
      read_at: None,
      created_at: Utc::now(),
      is_deleted: false,
      is_edited: false,
    }
  }

  #[test]
  fn channel_name_round_trips() {
    let channel = chat_channel(ChatId(123));
    assert_eq!(channel, "chat:123");
    assert_eq!(chat_id_from_channel(&channel), Some(ChatId(123)));
  }

  #[test]
  fn foreign_channels_are_skipped() {
    assert_eq!(chat_id_from_channel("user:5:notifications"), None);
    assert_eq!(chat_id_from_channel("chat:abc"), None);
    assert_eq!(chat_id_from_channel("chat:"), None);
  }

  #[test]
  fn message_envelope_wire_form() {
    let event = ChatEvent::message(&sample_message());
    let json = serde_json::to_value(&event).unwrap();

    assert_eq!(json["type"], "message");
    assert_eq!(json["chat_id"], 10);
    assert_eq!(json["message"]["id"], 100);
    assert_eq!(json["message"]["sender_id"], 1);
    assert_eq!(json["message"]["content"], "hi");
    // unread message omits read_at entirely
    assert!(json["message"].get("read_at").is_none());
  }

  #[test]
  fn edited_envelope_wire_form() {
    let event = ChatEvent::MessageEdited {
      chat_id: ChatId(10),
      sender_id: UserId(1),
      message_id: MessageId(100),
      new_content: "hi!".to_string(),
      edited_at: Utc::now(),
    };
    let json = serde_json::to_value(&event).unwrap();

    assert_eq!(json["type"], "message_edited");
    assert_eq!(json["message_id"], 100);
    assert_eq!(json["new_content"], "hi!");
    assert!(json.get("edited_at").is_some());
  }

  #[test]
  fn envelope_round_trips_through_offline_queue() {
    let event = ChatEvent::message(&sample_message());
    let stored = serde_json::to_string(&event).unwrap();
    let back: ChatEvent = serde_json::from_str(&stored).unwrap();
    assert_eq!(back, event);
    assert_eq!(back.delivery_message_id(), Some(MessageId(100)));
    assert_eq!(back.sender_id(), UserId(1));
  }

  #[test]
  fn edits_have_no_delivery_receipt() {
    let event = ChatEvent::MessageEdited {
      chat_id: ChatId(10),
      sender_id: UserId(1),
      message_id: MessageId(100),
      new_content: "x".to_string(),
      edited_at: Utc::now(),
    };
    assert_eq!(event.delivery_message_id(), None);
  }
}
