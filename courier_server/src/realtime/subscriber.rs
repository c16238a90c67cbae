//! Per-instance bus subscriber.
//!
//! One task owns a pattern subscription over every chat channel and pushes
//! each event into the delivery engine. On connection loss it reconnects
//! with exponential backoff and resubscribes; receive counters increment on
//! every arrival so an operator can see gaps regardless of parse outcome.

use futures::StreamExt;
use metrics::counter;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::events::{chat_id_from_channel, ChatEvent, CHAT_CHANNEL_PATTERN};
use crate::state::AppState;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Spawn the supervisor task. It runs until aborted at shutdown; dropping
/// the pub/sub connection unsubscribes.
pub fn spawn_subscriber(state: AppState) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut backoff = INITIAL_BACKOFF;
    loop {
      match run_subscription(&state).await {
        Ok(()) => {
          warn!("bus subscription stream ended; reconnecting");
          backoff = INITIAL_BACKOFF;
        }
        Err(e) => {
          error!("bus subscription failed: {}; retrying in {:?}", e, backoff);
        }
      }
      tokio::time::sleep(backoff).await;
      backoff = (backoff * 2).min(MAX_BACKOFF);
    }
  })
}

async fn run_subscription(state: &AppState) -> Result<(), AppError> {
  let client = state.sessions.client();
  let connection = client.get_async_connection().await?;
  let mut pubsub = connection.into_pubsub();
  pubsub.psubscribe(CHAT_CHANNEL_PATTERN).await?;

  info!("subscribed to bus pattern {}", CHAT_CHANNEL_PATTERN);

  let mut stream = pubsub.on_message();
  while let Some(message) = stream.next().await {
    counter!("bus_events_received_total").increment(1);

    let channel = message.get_channel_name().to_string();
    let Some(chat_id) = chat_id_from_channel(&channel) else {
      warn!("event on unexpected channel {}", channel);
      counter!("bus_events_malformed_total").increment(1);
      continue;
    };

    let payload: String = match message.get_payload() {
      Ok(payload) => payload,
      Err(e) => {
        warn!("unreadable payload on {}: {}", channel, e);
        counter!("bus_events_malformed_total").increment(1);
        continue;
      }
    };

    match serde_json::from_str::<ChatEvent>(&payload) {
      Ok(event) => state.delivery.handle_event(chat_id, event).await,
      Err(e) => {
        warn!("malformed envelope on {}: {}", channel, e);
        counter!("bus_events_malformed_total").increment(1);
      }
    }
  }

  Ok(())
}
