//! Configuration validation.

use super::{Config, DatabaseConfig};
use crate::db::postgres::SslMode;
use crate::error::{OrmError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_database(&config.database)?;

    if config.migrations.dir.as_os_str().is_empty() {
        return Err(OrmError::Config("migrations.dir must not be empty".into()));
    }
    if config.startup.retry_interval_ms == 0 {
        return Err(OrmError::Config(
            "startup.retry_interval_ms must be at least 1".into(),
        ));
    }

    Ok(())
}

pub(crate) fn validate_database(database: &DatabaseConfig) -> Result<()> {
    if database.host.is_empty() {
        return Err(OrmError::Config("database.host is required".into()));
    }
    if database.database.is_empty() {
        return Err(OrmError::Config("database.database is required".into()));
    }
    if database.user.is_empty() {
        return Err(OrmError::Config("database.user is required".into()));
    }
    if database.pool_size == 0 {
        return Err(OrmError::Config(
            "database.pool_size must be at least 1".into(),
        ));
    }
    SslMode::parse(&database.ssl_mode)?;
    Ok(())
}
