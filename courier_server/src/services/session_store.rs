//! Redis-backed session store.
//!
//! Thin facade over one multiplexed connection: presence flags, the
//! chat-membership mirror used for fan-out, per-user offline queues, the
//! refresh-token allowlist, sliding-window rate counters, and chat-channel
//! publishing. Every operation returns `Result` and callers on the realtime
//! path downgrade failures to warnings; the store being down must never take
//! a socket down with it.

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use courier_core::{ChatId, UserId};

use crate::config::RealtimeConfig;
use crate::error::AppError;
use crate::events::chat_channel;

/// Publish retry policy: 2 attempts, exponential.
const PUBLISH_ATTEMPTS: u32 = 2;
const PUBLISH_BACKOFF_MS: u64 = 50;

pub struct SessionStore {
  client: Arc<Client>,
  conn: Arc<RwLock<MultiplexedConnection>>,
  online_ttl: u64,
  offline_cap: i64,
  rate_max: u32,
  rate_window: u64,
}

impl SessionStore {
  pub async fn connect(url: &str, realtime: &RealtimeConfig) -> Result<Self, AppError> {
    let client = Arc::new(Client::open(url)?);
    let conn = client.get_multiplexed_async_connection().await?;

    Ok(Self {
      client,
      conn: Arc::new(RwLock::new(conn)),
      online_ttl: realtime.online_ttl_secs,
      offline_cap: realtime.offline_queue_cap,
      rate_max: realtime.rate_limit_max,
      rate_window: realtime.rate_limit_window_secs,
    })
  }

  /// The subscriber opens its own pub/sub connection from this client; the
  /// multiplexed connection cannot enter subscribe mode.
  pub fn client(&self) -> Arc<Client> {
    self.client.clone()
  }

  // ===== presence =====

  /// Advisory flag only; truth is a live socket in some instance's registry.
  pub async fn mark_online(&self, user_id: UserId) -> Result<(), AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("online:{}", user_id);
    conn.set_ex::<_, _, ()>(&key, "1", self.online_ttl).await?;
    Ok(())
  }

  pub async fn mark_offline(&self, user_id: UserId) -> Result<(), AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("online:{}", user_id);
    conn.del::<_, ()>(&key).await?;
    Ok(())
  }

  pub async fn is_online(&self, user_id: UserId) -> Result<bool, AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("online:{}", user_id);
    Ok(conn.exists(&key).await?)
  }

  // ===== sessions =====

  pub async fn register_session(&self, user_id: UserId, session_id: Uuid) -> Result<(), AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("user:sessions:{}", user_id);
    let _: () = redis::pipe()
      .sadd(&key, session_id.to_string())
      .expire(&key, self.online_ttl as i64)
      .query_async(&mut *conn)
      .await?;
    Ok(())
  }

  pub async fn remove_session(&self, user_id: UserId, session_id: Uuid) -> Result<(), AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("user:sessions:{}", user_id);
    conn.srem::<_, _, ()>(&key, session_id.to_string()).await?;
    Ok(())
  }

  /// Re-arm the presence TTLs. Called from the socket loop on each ping
  /// tick so an idle-but-alive connection never looks offline.
  pub async fn refresh_presence(&self, user_id: UserId) -> Result<(), AppError> {
    let mut conn = self.conn.write().await;
    let online_key = format!("online:{}", user_id);
    let sessions_key = format!("user:sessions:{}", user_id);
    let _: () = redis::pipe()
      .set_ex(&online_key, "1", self.online_ttl)
      .expire(&sessions_key, self.online_ttl as i64)
      .query_async(&mut *conn)
      .await?;
    Ok(())
  }

  // ===== chat membership mirror =====

  pub async fn add_user_to_chat(&self, user_id: UserId, chat_id: ChatId) -> Result<(), AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("chat_members:{}", chat_id);
    conn.sadd::<_, _, ()>(&key, user_id.inner()).await?;
    Ok(())
  }

  pub async fn remove_user_from_chat(
    &self,
    user_id: UserId,
    chat_id: ChatId,
  ) -> Result<(), AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("chat_members:{}", chat_id);
    conn.srem::<_, _, ()>(&key, user_id.inner()).await?;
    Ok(())
  }

  /// Fan-out target enumeration. Unparseable members are skipped.
  pub async fn chat_members(&self, chat_id: ChatId) -> Result<Vec<UserId>, AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("chat_members:{}", chat_id);
    let raw: Vec<String> = conn.smembers(&key).await?;
    Ok(
      raw
        .iter()
        .filter_map(|m| m.parse::<i64>().ok())
        .map(UserId)
        .collect(),
    )
  }

  // ===== publish =====

  /// Fire-and-forget with bounded retry. The DB row is already committed by
  /// the time this runs; a lost publish is bridged by the offline queue or
  /// history fetch.
  pub async fn publish_to_chat<T: Serialize>(
    &self,
    chat_id: ChatId,
    event: &T,
  ) -> Result<(), AppError> {
    let channel = chat_channel(chat_id);
    let payload = serde_json::to_string(event)?;

    let mut backoff = Duration::from_millis(PUBLISH_BACKOFF_MS);
    let mut attempt = 0;
    loop {
      attempt += 1;
      let result = {
        let mut conn = self.conn.write().await;
        conn.publish::<_, _, ()>(&channel, &payload).await
      };
      match result {
        Ok(()) => return Ok(()),
        Err(e) => {
          warn!(
            "publish to {} failed (attempt {}/{}): {}",
            channel, attempt, PUBLISH_ATTEMPTS, e
          );
          if attempt >= PUBLISH_ATTEMPTS {
            return Err(AppError::Store(e));
          }
          tokio::time::sleep(backoff).await;
          backoff *= 2;
        }
      }
    }
  }

  // ===== offline queue =====

  /// Right-push then trim to the newest `offline_cap` entries; the oldest
  /// silently fall off and remain reachable via message history.
  pub async fn store_offline(&self, user_id: UserId, payload: &str) -> Result<(), AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("offline:{}", user_id);
    let _: () = redis::pipe()
      .rpush(&key, payload)
      .ltrim(&key, -self.offline_cap as isize, -1)
      .query_async(&mut *conn)
      .await?;
    Ok(())
  }

  /// Atomic read-and-delete (MULTI/EXEC), FIFO by enqueue time.
  pub async fn drain_offline(&self, user_id: UserId) -> Result<Vec<String>, AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("offline:{}", user_id);
    let (payloads, _removed): (Vec<String>, i64) = redis::pipe()
      .atomic()
      .lrange(&key, 0, -1)
      .del(&key)
      .query_async(&mut *conn)
      .await?;
    Ok(payloads)
  }

  // ===== rate limiting =====

  /// Sliding window over a sorted set scored in milliseconds: drop entries
  /// older than the window, count, and admit only under the limit.
  pub async fn rate_check(&self, user_id: UserId) -> Result<bool, AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("ratelimit:msg:{}", user_id);
    let now_ms = chrono::Utc::now().timestamp_millis();
    let cutoff = now_ms - (self.rate_window as i64) * 1000;

    conn
      .zrembyscore::<_, _, _, ()>(&key, i64::MIN, cutoff)
      .await?;
    let count: u32 = conn.zcard(&key).await?;
    if count >= self.rate_max {
      return Ok(false);
    }

    // Member must be unique; two frames can land in the same millisecond.
    let member = format!("{}:{}", now_ms, Uuid::new_v4());
    let _: () = redis::pipe()
      .zadd(&key, member, now_ms)
      .expire(&key, self.rate_window as i64)
      .query_async(&mut *conn)
      .await?;
    Ok(true)
  }

  // ===== refresh-token allowlist =====

  pub async fn add_refresh(
    &self,
    jti: &str,
    user_id: UserId,
    ttl_secs: u64,
  ) -> Result<(), AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("refresh_jti:{}", jti);
    conn
      .set_ex::<_, _, ()>(&key, user_id.inner(), ttl_secs)
      .await?;
    Ok(())
  }

  pub async fn is_refresh_valid(&self, jti: &str) -> Result<bool, AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("refresh_jti:{}", jti);
    Ok(conn.exists(&key).await?)
  }

  pub async fn revoke_refresh(&self, jti: &str) -> Result<(), AppError> {
    let mut conn = self.conn.write().await;
    let key = format!("refresh_jti:{}", jti);
    conn.del::<_, ()>(&key).await?;
    Ok(())
  }
}
