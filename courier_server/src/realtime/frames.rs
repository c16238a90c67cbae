//! WebSocket frame types.
//!
//! Clients send `pong`, `message`, `read`, `edit_message`; anything else
//! parses to `Unknown` and is logged and ignored. Delivered chat events are
//! written to the socket as raw [`crate::events::ChatEvent`] envelopes, so
//! the server-side enum here only covers the connection-scoped frames.

use chrono::{DateTime, Utc};
use courier_core::{ChatId, MessageId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
  Pong,
  Message {
    chat_id: ChatId,
    content: String,
  },
  Read {
    message_ids: Vec<MessageId>,
  },
  EditMessage {
    chat_id: ChatId,
    message_id: MessageId,
    content: String,
  },
  #[serde(other)]
  Unknown,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
  Connected {
    user_id: UserId,
    timestamp: DateTime<Utc>,
  },
  Ping,
  Error {
    message: String,
    timestamp: DateTime<Utc>,
  },
}

impl ServerFrame {
  pub fn connected(user_id: UserId) -> Self {
    ServerFrame::Connected {
      user_id,
      timestamp: Utc::now(),
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    ServerFrame::Error {
      message: message.into(),
      timestamp: Utc::now(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_pong() {
    let frame: ClientFrame = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
    assert_eq!(frame, ClientFrame::Pong);
  }

  #[test]
  fn parses_message_frame() {
    let frame: ClientFrame =
      serde_json::from_str(r#"{"type":"message","chat_id":10,"content":"hi"}"#).unwrap();
    assert_eq!(
      frame,
      ClientFrame::Message {
        chat_id: ChatId(10),
        content: "hi".to_string(),
      }
    );
  }

  #[test]
  fn parses_read_batch() {
    let frame: ClientFrame =
      serde_json::from_str(r#"{"type":"read","message_ids":[100,101]}"#).unwrap();
    assert_eq!(
      frame,
      ClientFrame::Read {
        message_ids: vec![MessageId(100), MessageId(101)],
      }
    );
  }

  #[test]
  fn parses_edit_frame() {
    let frame: ClientFrame = serde_json::from_str(
      r#"{"type":"edit_message","chat_id":10,"message_id":100,"content":"hi!"}"#,
    )
    .unwrap();
    assert_eq!(
      frame,
      ClientFrame::EditMessage {
        chat_id: ChatId(10),
        message_id: MessageId(100),
        content: "hi!".to_string(),
      }
    );
  }

  #[test]
  fn unknown_type_is_tolerated() {
    let frame: ClientFrame =
      serde_json::from_str(r#"{"type":"typing_started","chat_id":10}"#).unwrap();
    assert_eq!(frame, ClientFrame::Unknown);
  }

  #[test]
  fn missing_fields_are_an_error_not_unknown() {
    // a recognized type with a broken payload must fail loudly so the
    // socket loop can answer with an error frame
    assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"message","chat_id":10}"#).is_err());
  }

  #[test]
  fn connected_frame_wire_form() {
    let json = serde_json::to_value(ServerFrame::connected(UserId(1))).unwrap();
    assert_eq!(json["type"], "connected");
    assert_eq!(json["user_id"], 1);
    assert!(json.get("timestamp").is_some());
  }

  #[test]
  fn ping_frame_wire_form() {
    let json = serde_json::to_string(&ServerFrame::Ping).unwrap();
    assert_eq!(json, r#"{"type":"ping"}"#);
  }

  #[test]
  fn error_frame_wire_form() {
    let json = serde_json::to_value(ServerFrame::error("rate_limited")).unwrap();
    assert_eq!(json["type"], "error");
    assert_eq!(json["message"], "rate_limited");
    assert!(json.get("timestamp").is_some());
  }
}
