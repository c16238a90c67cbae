//! # Courier Server
//!
//! The realtime delivery subsystem of the courier chat backend: a
//! WebSocket endpoint with token auth, a per-instance connection registry,
//! a Redis pub/sub fan-out bus between horizontally scaled instances, an
//! offline queue bridging presence gaps, and the message state machine
//! (created -> delivered -> read, plus edit/delete).

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod middleware;
pub mod realtime;
pub mod services;
pub mod state;

pub use config::AppConfig;
pub use error::AppError;
pub use events::ChatEvent;
pub use state::AppState;

use anyhow::Result;
use axum::{middleware::from_fn_with_state, routing::get, Router};
use http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::middleware::verify_token_middleware;
use crate::realtime::{spawn_subscriber, ws_handler};

/// Build the application: construct state, start the bus subscriber, wire
/// the routes. Returns the router together with the state so `main` can
/// drive graceful shutdown.
pub async fn get_router(config: AppConfig) -> Result<(Router, AppState)> {
  let cors = cors_layer(&config.server.allowed_origins);
  let state = AppState::try_new(config).await?;

  let subscriber = spawn_subscriber(state.clone());
  state.set_subscriber(subscriber).await;

  // The realtime endpoint authenticates inside the upgrade (header or
  // legacy query token); the API routes use header auth via middleware.
  let api_routes = Router::new()
    .route("/online-users", get(handlers::get_online_users_handler))
    .layer(from_fn_with_state(
      state.clone(),
      verify_token_middleware::<AppState>,
    ));

  let public_routes = Router::new()
    .route("/health", get(handlers::health_check))
    .route("/ready", get(handlers::readiness_check));

  let app = Router::new()
    .route("/ws", get(ws_handler))
    .merge(api_routes)
    .merge(public_routes)
    .layer(cors)
    .layer(TraceLayer::new_for_http())
    .with_state(state.clone());

  Ok((app, state))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
  let origins: Vec<HeaderValue> = allowed_origins
    .iter()
    .filter_map(|origin| match origin.parse::<HeaderValue>() {
      Ok(value) => Some(value),
      Err(_) => {
        warn!("ignoring unparseable CORS origin: {}", origin);
        None
      }
    })
    .collect();

  if origins.is_empty() {
    CorsLayer::new()
  } else {
    CorsLayer::new()
      .allow_origin(origins)
      .allow_methods([Method::GET, Method::POST])
      .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
  }
}
