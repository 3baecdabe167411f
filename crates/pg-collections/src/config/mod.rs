//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{OrmError, Result};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl DatabaseConfig {
    /// Build connection settings from a `postgres://` URL or a libpq
    /// key/value string.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed: tokio_postgres::Config = url
            .parse()
            .map_err(|e| OrmError::Config(format!("invalid database URL: {}", e)))?;

        let host = parsed
            .get_hosts()
            .iter()
            .find_map(|host| match host {
                tokio_postgres::config::Host::Tcp(name) => Some(name.clone()),
                #[allow(unreachable_patterns)]
                _ => None,
            })
            .unwrap_or_else(|| "localhost".to_string());
        let password = parsed
            .get_password()
            .map(|p| String::from_utf8_lossy(p).into_owned());
        let ssl_mode = match parsed.get_ssl_mode() {
            tokio_postgres::config::SslMode::Require => "require",
            _ => "disable",
        };

        let config = Self {
            host,
            port: parsed.get_ports().first().copied().unwrap_or(5432),
            database: parsed.get_dbname().unwrap_or_default().to_string(),
            user: parsed.get_user().unwrap_or_default().to_string(),
            password,
            ssl_mode: ssl_mode.to_string(),
            pool_size: 10,
            connect_timeout_secs: 30,
        };
        validation::validate_database(&config)?;
        Ok(config)
    }
}
