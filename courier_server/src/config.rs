use anyhow::{bail, Result};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
  pub server: ServerConfig,
  #[serde(default)]
  pub auth: AuthConfig,
  #[serde(default)]
  pub realtime: RealtimeConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_port")]
  pub port: u16,
  pub db_url: String,
  #[serde(default = "default_redis_url")]
  pub redis_url: String,
  #[serde(default)]
  pub allowed_origins: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
  #[serde(default = "default_secret")]
  pub secret: String,
  #[serde(default = "default_algorithm")]
  pub algorithm: String,
  #[serde(default = "default_access_minutes")]
  pub access_token_minutes: u64,
  #[serde(default = "default_refresh_days")]
  pub refresh_token_days: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RealtimeConfig {
  #[serde(default = "default_ping_interval")]
  pub ping_interval_secs: u64,
  #[serde(default = "default_max_missed")]
  pub max_missed_pongs: u32,
  #[serde(default = "default_rate_limit_max")]
  pub rate_limit_max: u32,
  #[serde(default = "default_rate_limit_window")]
  pub rate_limit_window_secs: u64,
  #[serde(default = "default_offline_cap")]
  pub offline_queue_cap: i64,
  #[serde(default = "default_online_ttl")]
  pub online_ttl_secs: u64,
}

fn default_port() -> u16 {
  8000
}
fn default_redis_url() -> String {
  "redis://127.0.0.1:6379/0".to_string()
}
fn default_secret() -> String {
  "change-me-in-production-please-32b!".to_string()
}
fn default_algorithm() -> String {
  "HS256".to_string()
}
fn default_access_minutes() -> u64 {
  30
}
fn default_refresh_days() -> u64 {
  7
}
fn default_ping_interval() -> u64 {
  25
}
fn default_max_missed() -> u32 {
  3
}
fn default_rate_limit_max() -> u32 {
  5
}
fn default_rate_limit_window() -> u64 {
  10
}
fn default_offline_cap() -> i64 {
  300
}
fn default_online_ttl() -> u64 {
  90
}

impl Default for AuthConfig {
  fn default() -> Self {
    Self {
      secret: default_secret(),
      algorithm: default_algorithm(),
      access_token_minutes: default_access_minutes(),
      refresh_token_days: default_refresh_days(),
    }
  }
}

impl Default for RealtimeConfig {
  fn default() -> Self {
    Self {
      ping_interval_secs: default_ping_interval(),
      max_missed_pongs: default_max_missed(),
      rate_limit_max: default_rate_limit_max(),
      rate_limit_window_secs: default_rate_limit_window(),
      offline_queue_cap: default_offline_cap(),
      online_ttl_secs: default_online_ttl(),
    }
  }
}

impl AppConfig {
  /// Read from ./courier.yml, /etc/config/courier.yml, or the path in
  /// COURIER_CONFIG, then apply env-var overrides.
  pub fn load() -> Result<Self> {
    let ret: std::result::Result<AppConfig, serde_yaml::Error> = match (
      File::open("courier.yml"),
      File::open("/etc/config/courier.yml"),
      env::var("COURIER_CONFIG"),
    ) {
      (Ok(reader), _, _) => serde_yaml::from_reader(reader),
      (_, Ok(reader), _) => serde_yaml::from_reader(reader),
      (_, _, Ok(path)) => serde_yaml::from_reader(File::open(path)?),
      _ => bail!("Config file not found"),
    };

    let mut config = ret?;
    config.apply_env_overrides();
    Ok(config)
  }

  /// DATABASE_URL / REDIS_URL / JWT_SECRET take precedence over the file so
  /// deployments can keep credentials out of it.
  fn apply_env_overrides(&mut self) {
    if let Ok(db_url) = env::var("DATABASE_URL") {
      self.server.db_url = db_url;
    }
    if let Ok(redis_url) = env::var("REDIS_URL") {
      self.server.redis_url = redis_url;
    }
    if let Ok(secret) = env::var("JWT_SECRET") {
      self.auth.secret = secret;
    }
  }

  pub fn jwt_algorithm(&self) -> Result<Algorithm> {
    match self.auth.algorithm.as_str() {
      "HS256" => Ok(Algorithm::HS256),
      "HS384" => Ok(Algorithm::HS384),
      "HS512" => Ok(Algorithm::HS512),
      other => bail!("Unsupported JWT algorithm: {}", other),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn minimal_yaml_gets_defaults() {
    let yaml = r#"
server:
  db_url: postgres://localhost/courier
"#;
    let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.server.port, 8000);
    assert_eq!(config.server.redis_url, "redis://127.0.0.1:6379/0");
    assert_eq!(config.auth.algorithm, "HS256");
    assert_eq!(config.realtime.ping_interval_secs, 25);
    assert_eq!(config.realtime.max_missed_pongs, 3);
    assert_eq!(config.realtime.rate_limit_max, 5);
    assert_eq!(config.realtime.rate_limit_window_secs, 10);
    assert_eq!(config.realtime.offline_queue_cap, 300);
    assert_eq!(config.realtime.online_ttl_secs, 90);
  }

  #[test]
  fn explicit_values_win() {
    let yaml = r#"
server:
  port: 9100
  db_url: postgres://localhost/courier
  redis_url: redis://cache:6379/1
auth:
  algorithm: HS512
realtime:
  ping_interval_secs: 10
  offline_queue_cap: 50
"#;
    let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.server.port, 9100);
    assert_eq!(config.server.redis_url, "redis://cache:6379/1");
    assert_eq!(config.jwt_algorithm().unwrap(), Algorithm::HS512);
    assert_eq!(config.realtime.ping_interval_secs, 10);
    assert_eq!(config.realtime.offline_queue_cap, 50);
    // untouched sections still default
    assert_eq!(config.realtime.max_missed_pongs, 3);
  }

  #[test]
  fn unsupported_algorithm_is_rejected() {
    let yaml = r#"
server:
  db_url: postgres://localhost/courier
auth:
  algorithm: RS256
"#;
    let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
    assert!(config.jwt_algorithm().is_err());
  }
}
