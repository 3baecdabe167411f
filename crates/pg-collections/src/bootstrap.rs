//! Startup sequence: connect, wait for the server, apply migrations.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{Config, StartupConfig};
use crate::core::Fragment;
use crate::db::{Database, PgProvider};
use crate::error::Result;
use crate::migrate::{apply_migrations, discover_migrations};

/// Retry `SELECT 1` until the server answers.
///
/// Gives up after `startup.max_attempts` failures with the last error;
/// `max_attempts == 0` retries forever.
pub async fn wait_until_ready(db: &Database, startup: &StartupConfig) -> Result<()> {
    let ping = Fragment::sql("SELECT 1");
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match db.query(&ping).await {
            Ok(_) => {
                if attempt > 1 {
                    info!("Postgres is available after {} attempts", attempt);
                }
                return Ok(());
            }
            Err(e) => {
                warn!("Postgres is unavailable: {}", e);
                if startup.max_attempts != 0 && attempt >= startup.max_attempts {
                    return Err(e);
                }
            }
        }
        tokio::time::sleep(startup.retry_interval()).await;
    }
}

/// Discover and apply the migrations in `dir`, logging any failure before
/// returning it.
pub async fn migrate_database(db: &Database, dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let result = async {
        let migrations = discover_migrations(dir).await?;
        apply_migrations(db, &migrations).await
    }
    .await;

    if let Err(e) = &result {
        error!("Migration error: {}", e);
    }
    result
}

/// A ready-to-use database plus the migrations applied while starting it.
pub struct Initialized {
    pub db: Database,
    pub applied: Vec<String>,
}

/// Build the pool, wait for the server and bring the schema up to date.
pub async fn init_database(config: &Config) -> Result<Initialized> {
    let provider = PgProvider::connect(&config.database)?;
    let db = Database::new(Arc::new(provider));

    wait_until_ready(&db, &config.startup).await?;
    let applied = migrate_database(&db, &config.migrations.dir).await?;
    Ok(Initialized { db, applied })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrmError;
    use crate::testing::ScriptedProvider;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn flaky(failures: u32) -> Arc<ScriptedProvider> {
        let calls = AtomicU32::new(0);
        ScriptedProvider::new(move |sql, _| {
            if sql == "SELECT 1" && calls.fetch_add(1, Ordering::SeqCst) < failures {
                Err(OrmError::pool("connection refused", "acquiring PostgreSQL connection"))
            } else {
                Ok(Vec::new())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_retries_until_available() {
        let provider = flaky(3);
        let db = Database::new(provider.clone());
        let startup = StartupConfig {
            max_attempts: 10,
            retry_interval_ms: 1000,
        };
        wait_until_ready(&db, &startup).await.unwrap();
        assert_eq!(provider.statements().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_after_max_attempts() {
        let provider = flaky(u32::MAX);
        let db = Database::new(provider.clone());
        let startup = StartupConfig {
            max_attempts: 3,
            retry_interval_ms: 10,
        };
        let err = wait_until_ready(&db, &startup).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(provider.statements().len(), 3);
    }

    #[tokio::test]
    async fn test_migrate_database_reports_bad_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("oops.sql"), "").unwrap();
        let provider = ScriptedProvider::empty();
        let db = Database::new(provider.clone());

        let err = migrate_database(&db, dir.path()).await.unwrap_err();
        assert!(matches!(err, OrmError::Migration(_)));
        assert!(provider.statements().is_empty());
    }

    #[tokio::test]
    async fn test_migrate_database_applies_scripts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("2024-01-01 00-00 init.sql"),
            "CREATE TABLE users (id BIGINT PRIMARY KEY);",
        )
        .unwrap();
        let provider = ScriptedProvider::empty();
        let db = Database::new(provider.clone());

        let applied = migrate_database(&db, dir.path()).await.unwrap();
        assert_eq!(applied, vec!["init"]);
        assert!(provider
            .statements()
            .iter()
            .any(|s| s == "CREATE TABLE users (id BIGINT PRIMARY KEY);"));
    }
}
