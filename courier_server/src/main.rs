use anyhow::Result;

use courier_server::{get_router, AppConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(tracing_subscriber::fmt::layer())
    .init();

  let config = match AppConfig::load() {
    Ok(config) => config,
    Err(e) => {
      eprintln!("Failed to load configuration: {}", e);
      eprintln!("Provide courier.yml next to the binary, or set COURIER_CONFIG.");
      std::process::exit(1);
    }
  };

  let addr = format!("0.0.0.0:{}", config.server.port);
  let (app, state) = get_router(config).await?;

  let listener = TcpListener::bind(&addr).await?;
  info!("courier_server listening on {}", addr);

  axum::serve(listener, app.into_make_service())
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  state.shutdown().await;

  Ok(())
}

async fn shutdown_signal() {
  let _ = tokio::signal::ctrl_c().await;
  info!("shutdown signal received");
}
