//! Health probes.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

pub async fn health_check() -> impl IntoResponse {
  Json(json!({
      "status": "healthy",
      "service": "courier_server",
      "version": env!("CARGO_PKG_VERSION"),
      "timestamp": chrono::Utc::now().to_rfc3339(),
  }))
}

/// Readiness: the process can take traffic. Reports the local connection
/// count so an operator can eyeball instance balance.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
  let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
    .fetch_one(&*state.pool)
    .await
    .is_ok();

  Json(json!({
      "status": if db_ok { "ready" } else { "degraded" },
      "service": "courier_server",
      "online_local": state.registry.online_count(),
      "dependencies": {
          "database": if db_ok { "connected" } else { "unreachable" },
      }
  }))
}
