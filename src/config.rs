use std::fs;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

/// Process-wide settings, loaded once at startup and handed to every
/// component by constructor injection (no global mutable config).
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FleetConfig {
    pub db_url: String,
    pub db_max_connections: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub db_acquire_timeout: Duration,

    pub redis_url: String,
    pub redis_max_connections: u32,

    pub rabbitmq_url: String,

    pub secret: String,

    #[serde_as(as = "DurationSeconds<u64>")]
    pub session_ttl: Duration,

    pub chat_base_url: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub chat_request_timeout: Duration,

    pub extractor_host: String,
    pub extractor_port: u16,

    pub http_addr: String,

    /// Balancer boot sizing (§4.3 "initial capacity").
    pub workers_count: usize,
    pub instances_per_worker: usize,
    /// Address the balancer's control-plane listener binds to, e.g.
    /// `127.0.0.1:0` to pick an ephemeral port per boot.
    pub balancer_control_addr: String,
}

impl FleetConfig {
    pub fn new_from_file_and_env(path: &str) -> Result<Self, ConfigError> {
        let mut cfg: Self = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("fleet"))
            .build()
            .and_then(|cfg| cfg.try_deserialize())?;

        cfg.secret = resolve_secret(&cfg.secret)?;
        Ok(cfg)
    }
}

/// Values of the form `file:<path>` are read from disk, mirroring the
/// `SECRET_FILE`/`POSTGRES_PASSWORD_FILE` convention from §6: secrets can
/// be handed to the process either inline or as a path to a mounted file.
fn resolve_secret(value: &str) -> Result<String, ConfigError> {
    match value.strip_prefix("file:") {
        Some(path) => fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| ConfigError::Message(format!("reading secret file {path}: {e}"))),
        None => Ok(value.to_string()),
    }
}
