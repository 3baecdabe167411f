//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// PostgreSQL connection settings.
    pub database: DatabaseConfig,

    /// Where migration scripts live.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Wait-for-database behavior on startup.
    #[serde(default)]
    pub startup: StartupConfig,
}

/// PostgreSQL connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Never written back out.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// SSL mode: disable, require, verify-ca or verify-full (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 10).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// TCP connect timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("ssl_mode", &self.ssl_mode)
            .field("pool_size", &self.pool_size)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Migration script location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory of `YYYY-MM-DD HH-MM <name>.sql` files (default: "migrations").
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
        }
    }
}

/// Startup retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Attempts before giving up on the database; 0 retries forever (default: 30).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts in milliseconds (default: 1000).
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl StartupConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_max_attempts() -> u32 {
    30
}

fn default_retry_interval_ms() -> u64 {
    1000
}
