//! Process-wide state, constructed once at startup and injected into the
//! handlers. There are no module-level singletons: the registry, the
//! session store and the delivery engine are wired here and shared by Arc.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use courier_core::{AuthError, TokenClaims, TokenKind, TokenManager};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::middleware::TokenVerifier;
use crate::realtime::{ConnectionRegistry, DeliveryEngine, MembershipSync};
use crate::services::{ChatRepository, MessageService, SessionStore};

#[derive(Clone)]
pub struct AppState {
  inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
  pub config: AppConfig,
  pub pool: Arc<PgPool>,
  pub token_manager: TokenManager,
  pub sessions: Arc<SessionStore>,
  pub registry: Arc<ConnectionRegistry>,
  pub chats: Arc<ChatRepository>,
  pub messages: Arc<MessageService>,
  pub membership: MembershipSync,
  pub delivery: Arc<DeliveryEngine>,
  subscriber: Mutex<Option<JoinHandle<()>>>,
}

impl Deref for AppState {
  type Target = AppStateInner;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

impl AppState {
  pub async fn try_new(config: AppConfig) -> Result<Self, AppError> {
    let token_manager = TokenManager::new(
      &config.auth.secret,
      config
        .jwt_algorithm()
        .map_err(|e| AppError::Config(e.to_string()))?,
    );

    let pool = Arc::new(
      PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.server.db_url)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?,
    );

    let sessions = Arc::new(SessionStore::connect(&config.server.redis_url, &config.realtime).await?);

    let registry = Arc::new(ConnectionRegistry::new());
    let chats = Arc::new(ChatRepository::new(pool.clone()));
    let messages = Arc::new(MessageService::new(pool.clone()));
    let membership = MembershipSync::new(chats.clone(), sessions.clone());
    let delivery = Arc::new(DeliveryEngine::new(
      registry.clone(),
      sessions.clone(),
      messages.clone(),
      chats.clone(),
    ));

    Ok(Self {
      inner: Arc::new(AppStateInner {
        config,
        pool,
        token_manager,
        sessions,
        registry,
        chats,
        messages,
        membership,
        delivery,
        subscriber: Mutex::new(None),
      }),
    })
  }

  /// Verify a refresh token: signature, expiry, `type` claim, and the
  /// revocation allowlist in the session store. Used by the token-refresh
  /// surface; realtime connections only ever accept access tokens.
  pub async fn verify_refresh_token(&self, token: &str) -> Result<TokenClaims, AppError> {
    let claims = self.token_manager.verify(token, TokenKind::Refresh)?;
    let jti = claims.jti.as_deref().ok_or(AuthError::Malformed)?;
    if !self.sessions.is_refresh_valid(jti).await? {
      return Err(AppError::Unauthenticated(AuthError::Expired));
    }
    Ok(claims)
  }

  pub async fn set_subscriber(&self, handle: JoinHandle<()>) {
    *self.inner.subscriber.lock().await = Some(handle);
  }

  /// Graceful shutdown: close every socket with a normal-closure code and
  /// tear down the bus subscription.
  pub async fn shutdown(&self) {
    info!(
      "shutting down: closing {} sockets",
      self.registry.online_count()
    );
    self.registry.close_all();
    if let Some(handle) = self.inner.subscriber.lock().await.take() {
      handle.abort();
    }
  }
}

impl TokenVerifier for AppState {
  fn verify_access_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
    self.token_manager.verify_access(token)
  }
}
