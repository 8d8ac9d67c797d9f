//! Configuration for the hub.

use std::path::PathBuf;
use std::time::Duration;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub migrations_dir: PathBuf,
    pub admin_api_key: String,
    pub voting_duration_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub connection_queue_capacity: usize,
    pub recent_log_capacity: usize,
    pub rate_limit_enabled: bool,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env_or("PORT", 8080);
        let database_path = std::env::var("DATABASE_PATH")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map(|s| PathBuf::from(s.trim_start_matches("sqlite:")))
            .unwrap_or_else(|_| PathBuf::from("./data/hub.db"));
        let migrations_dir = std::env::var("MIGRATIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("migrations"));
        let admin_api_key =
            std::env::var("ADMIN_API_KEY").map_err(|_| std::env::VarError::NotPresent)?;

        Ok(Self {
            host,
            port,
            database_path,
            migrations_dir,
            admin_api_key,
            voting_duration_secs: env_or("VOTING_DURATION_SECS", 60),
            heartbeat_timeout_secs: env_or("HEARTBEAT_TIMEOUT_SECS", 60),
            connection_queue_capacity: env_or("CONNECTION_QUEUE_CAPACITY", 64).max(1),
            recent_log_capacity: env_or("RECENT_LOG_CAPACITY", 50),
            rate_limit_enabled: env_or("RATE_LIMIT_ENABLED", true),
        })
    }

    /// Config for tests: in-repo migrations, no rate limiting.
    pub fn for_test(database_path: PathBuf, admin_api_key: &str) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_path,
            migrations_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../../migrations")),
            admin_api_key: admin_api_key.to_string(),
            voting_duration_secs: 60,
            heartbeat_timeout_secs: 60,
            connection_queue_capacity: 64,
            recent_log_capacity: 50,
            rate_limit_enabled: false,
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}
