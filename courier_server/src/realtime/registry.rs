//! In-process connection registry.
//!
//! At most one live socket per user per instance; a newer connection
//! displaces the older one with a normal close. The registry is the sole
//! mutator of the map, and disconnects are guarded by the session id so a
//! displaced socket tearing itself down cannot evict its successor.

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use courier_core::UserId;

/// Outbound channel depth per socket.
pub const CHANNEL_CAPACITY: usize = 256;

/// Commands consumed by a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketCommand {
  /// Pre-serialized JSON text frame.
  Frame(String),
  /// Close the socket with the given code and stop writing.
  Close(u16),
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
  session_id: Uuid,
  sender: mpsc::Sender<SocketCommand>,
}

impl ConnectionHandle {
  pub fn new(session_id: Uuid, sender: mpsc::Sender<SocketCommand>) -> Self {
    Self { session_id, sender }
  }

  pub fn session_id(&self) -> Uuid {
    self.session_id
  }

  /// Non-blocking enqueue. A full buffer counts as a dead peer: the writer
  /// is not draining, so the socket is treated as gone.
  pub fn send(&self, command: SocketCommand) -> bool {
    self.sender.try_send(command).is_ok()
  }

  pub fn send_json<T: Serialize>(&self, value: &T) -> bool {
    match serde_json::to_string(value) {
      Ok(json) => self.send(SocketCommand::Frame(json)),
      Err(e) => {
        warn!("failed to serialize outbound frame: {}", e);
        false
      }
    }
  }
}

pub struct ConnectionRegistry {
  connections: DashMap<UserId, ConnectionHandle>,
}

impl ConnectionRegistry {
  pub fn new() -> Self {
    Self {
      connections: DashMap::new(),
    }
  }

  /// Insert the handle, returning the displaced predecessor if the user was
  /// already connected on this instance.
  pub fn register(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
    let displaced = self.connections.insert(user_id, handle);
    if displaced.is_some() {
      info!("user {} reconnected, displacing previous socket", user_id);
    }
    displaced
  }

  /// Remove the user's entry, but only if it still belongs to the given
  /// session. Returns whether an entry was removed; idempotent.
  pub fn disconnect(&self, user_id: UserId, session_id: Uuid) -> bool {
    self
      .connections
      .remove_if(&user_id, |_, handle| handle.session_id() == session_id)
      .is_some()
  }

  pub fn is_connected(&self, user_id: UserId) -> bool {
    self.connections.contains_key(&user_id)
  }

  pub fn online_count(&self) -> usize {
    self.connections.len()
  }

  /// Send a pre-serialized frame to a locally connected user. A failed send
  /// means the socket is dead; the entry is dropped and `false` returned so
  /// the caller falls over to the offline queue.
  pub fn send_raw(&self, user_id: UserId, payload: String) -> bool {
    let Some(handle) = self.connections.get(&user_id) else {
      return false;
    };

    if handle.send(SocketCommand::Frame(payload)) {
      true
    } else {
      let session_id = handle.session_id();
      drop(handle);
      warn!("dropping dead socket for user {}", user_id);
      self.disconnect(user_id, session_id);
      false
    }
  }

  pub fn send_json<T: Serialize>(&self, user_id: UserId, value: &T) -> bool {
    match serde_json::to_string(value) {
      Ok(json) => self.send_raw(user_id, json),
      Err(e) => {
        warn!("failed to serialize outbound frame: {}", e);
        false
      }
    }
  }

  /// Shutdown path: ask every writer to close with a normal-closure code
  /// and clear the map.
  pub fn close_all(&self) {
    for entry in self.connections.iter() {
      entry.value().send(SocketCommand::Close(1000));
    }
    self.connections.clear();
  }
}

impl Default for ConnectionRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn handle() -> (ConnectionHandle, mpsc::Receiver<SocketCommand>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (ConnectionHandle::new(Uuid::new_v4(), tx), rx)
  }

  #[tokio::test]
  async fn register_and_send() {
    let registry = ConnectionRegistry::new();
    let (conn, mut rx) = handle();

    assert!(registry.register(UserId(1), conn).is_none());
    assert!(registry.is_connected(UserId(1)));
    assert!(registry.send_raw(UserId(1), "{\"type\":\"ping\"}".into()));

    assert_eq!(
      rx.recv().await,
      Some(SocketCommand::Frame("{\"type\":\"ping\"}".into()))
    );
  }

  #[tokio::test]
  async fn second_connection_displaces_first() {
    let registry = ConnectionRegistry::new();
    let (first, mut first_rx) = handle();
    let (second, mut second_rx) = handle();

    registry.register(UserId(1), first);
    let displaced = registry.register(UserId(1), second).unwrap();

    // the caller closes the displaced socket with a normal-closure code
    assert!(displaced.send(SocketCommand::Close(1000)));
    assert_eq!(first_rx.recv().await, Some(SocketCommand::Close(1000)));

    // subsequent sends go only to the new socket
    assert!(registry.send_raw(UserId(1), "x".into()));
    assert_eq!(second_rx.recv().await, Some(SocketCommand::Frame("x".into())));
    assert!(first_rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn displaced_session_cannot_evict_successor() {
    let registry = ConnectionRegistry::new();
    let (first, _first_rx) = handle();
    let (second, _second_rx) = handle();
    let first_session = first.session_id();
    let second_session = second.session_id();

    registry.register(UserId(1), first);
    registry.register(UserId(1), second);

    // stale disconnect from the displaced socket's teardown is a no-op
    assert!(!registry.disconnect(UserId(1), first_session));
    assert!(registry.is_connected(UserId(1)));

    // the live session still owns the slot
    assert!(registry.disconnect(UserId(1), second_session));
    assert!(!registry.is_connected(UserId(1)));
  }

  #[tokio::test]
  async fn disconnect_is_idempotent() {
    let registry = ConnectionRegistry::new();
    let (conn, _rx) = handle();
    let session = conn.session_id();

    registry.register(UserId(1), conn);
    assert!(registry.disconnect(UserId(1), session));
    assert!(!registry.disconnect(UserId(1), session));
  }

  #[tokio::test]
  async fn dead_socket_is_evicted_on_send() {
    let registry = ConnectionRegistry::new();
    let (conn, rx) = handle();

    registry.register(UserId(1), conn);
    drop(rx); // the writer task is gone

    assert!(!registry.send_raw(UserId(1), "x".into()));
    assert!(!registry.is_connected(UserId(1)));
  }

  #[tokio::test]
  async fn send_to_absent_user_is_false() {
    let registry = ConnectionRegistry::new();
    assert!(!registry.send_raw(UserId(7), "x".into()));
  }

  #[tokio::test]
  async fn close_all_signals_every_writer() {
    let registry = ConnectionRegistry::new();
    let (a, mut a_rx) = handle();
    let (b, mut b_rx) = handle();

    registry.register(UserId(1), a);
    registry.register(UserId(2), b);
    registry.close_all();

    assert_eq!(a_rx.recv().await, Some(SocketCommand::Close(1000)));
    assert_eq!(b_rx.recv().await, Some(SocketCommand::Close(1000)));
    assert_eq!(registry.online_count(), 0);
  }
}
