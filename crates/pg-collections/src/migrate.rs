//! Ordered, drift-checked schema migrations.
//!
//! Migration scripts live in one directory as `YYYY-MM-DD HH-MM <name>.sql`.
//! Applied migrations are recorded in the `migrations` table; the most
//! recently recorded name must still be among the discovered scripts, and
//! everything after it is applied in filename order inside one transaction.

use std::collections::HashSet;
use std::path::Path;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collection::Entity;
use crate::core::{join_fragments, Fragment, Id, SqlValue};
use crate::db::{Database, Transaction};
use crate::error::{OrmError, Result};
use crate::query::{Filter, FindOptions, Order};

const CREATE_HISTORY_TABLE: &str = "CREATE TABLE IF NOT EXISTS migrations (\
    id SERIAL PRIMARY KEY, \
    name VARCHAR(255) NOT NULL UNIQUE, \
    \"runAt\" TIMESTAMP NOT NULL)";

/// Length of the `YYYY-MM-DD HH-MM` filename prefix.
const STAMP_LEN: usize = 16;

/// One discovered script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: String,
    pub script: String,
}

/// A row of the migration history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: Id,
    pub name: String,
    #[serde(rename = "runAt")]
    pub run_at: NaiveDateTime,
}

impl Entity for MigrationRecord {
    const TABLE: &'static str = "migrations";

    fn id(&self) -> &Id {
        &self.id
    }
}

/// Applied history and what is left to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationRecord>,
    pub pending: Vec<String>,
}

/// Extract the migration name from a `YYYY-MM-DD HH-MM <name>.sql` filename.
pub fn parse_migration_filename(file_name: &str) -> Result<String> {
    let invalid = || OrmError::Migration(format!("Incorrect migration filename: {}", file_name));

    let stem = file_name.strip_suffix(".sql").ok_or_else(invalid)?;
    if stem.len() <= STAMP_LEN + 1 || !stem.is_char_boundary(STAMP_LEN) {
        return Err(invalid());
    }
    let (stamp, rest) = stem.split_at(STAMP_LEN);

    let shape_ok = stamp.bytes().enumerate().all(|(i, b)| match i {
        4 | 7 | 13 => b == b'-',
        10 => b == b' ',
        _ => b.is_ascii_digit(),
    });
    if !shape_ok || NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H-%M").is_err() {
        return Err(invalid());
    }

    match rest.strip_prefix(' ') {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(invalid()),
    }
}

/// Read every migration script in `dir`, ordered by filename.
///
/// Hidden files are ignored; any other file must follow the naming scheme.
pub async fn discover_migrations(dir: impl AsRef<Path>) -> Result<Vec<Migration>> {
    let dir = dir.as_ref();
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with('.') {
            continue;
        }
        files.push((file_name, entry.path()));
    }
    files.sort();

    let mut seen = HashSet::new();
    let mut migrations = Vec::with_capacity(files.len());
    for (file_name, path) in files {
        let name = parse_migration_filename(&file_name)?;
        if !seen.insert(name.clone()) {
            return Err(OrmError::Migration(format!(
                "Migration with name \"{}\" already exists",
                name
            )));
        }
        let script = tokio::fs::read_to_string(&path).await?;
        migrations.push(Migration { name, script });
    }

    debug!("Discovered {} migrations in {}", migrations.len(), dir.display());
    Ok(migrations)
}

/// The migrations after `last_applied`, or all of them when nothing was applied.
pub fn pending_after<'a>(
    last_applied: Option<&str>,
    migrations: &'a [Migration],
) -> Result<&'a [Migration]> {
    let Some(last) = last_applied else {
        return Ok(migrations);
    };
    match migrations.iter().position(|m| m.name == last) {
        Some(idx) => Ok(&migrations[idx + 1..]),
        None => Err(OrmError::Migration(format!("{} is not found in migrations", last))),
    }
}

async fn last_applied(tx: &Transaction) -> Result<Option<String>> {
    let latest = tx
        .collection::<MigrationRecord>()?
        .find_all(Filter::all(), &FindOptions::new().order(Order::desc("id")).limit(1))
        .await?;
    Ok(latest.into_iter().next().map(|record| record.name))
}

fn history_insert(applied: &[Migration]) -> Result<Fragment> {
    let now = SqlValue::Timestamp(Utc::now().naive_utc());
    let rows = applied
        .iter()
        .map(|m| {
            Fragment::builder()
                .sql("(")
                .bind(m.name.as_str())
                .sql(", ")
                .bind(now.clone())
                .sql(")")
                .build()
        })
        .collect();
    Ok(Fragment::builder()
        .sql("INSERT INTO ")
        .raw(crate::core::quote_identifier(MigrationRecord::TABLE)?)
        .sql(" (\"name\", \"runAt\") VALUES ")
        .append(join_fragments(rows, Some(Fragment::sql(", "))))
        .build())
}

/// Apply every pending migration in one transaction and record them.
///
/// Returns the names applied, in order.
pub async fn apply_migrations(db: &Database, migrations: &[Migration]) -> Result<Vec<String>> {
    db.transaction(|tx| async move {
        tx.execute_script(CREATE_HISTORY_TABLE).await?;
        if migrations.is_empty() {
            return Ok(Vec::new());
        }

        let last = last_applied(&tx).await?;
        let pending = pending_after(last.as_deref(), migrations)?;
        if pending.is_empty() {
            debug!("No pending migrations");
            return Ok(Vec::new());
        }

        for migration in pending {
            debug!("Applying migration {}", migration.name);
            tx.execute_script(&migration.script)
                .await
                .map_err(|e| OrmError::MigrationScript {
                    name: migration.name.clone(),
                    source: Box::new(e),
                })?;
        }
        tx.query(&history_insert(pending)?).await?;

        let names: Vec<String> = pending.iter().map(|m| m.name.clone()).collect();
        info!("Apply new migrations: {}", names.join(", "));
        Ok(names)
    })
    .await
}

/// Read-only view of applied and pending migrations, with the same drift
/// rule as [`apply_migrations`].
pub async fn pending_migrations(
    db: &Database,
    migrations: &[Migration],
) -> Result<MigrationStatus> {
    #[derive(Deserialize)]
    struct Exists {
        present: bool,
    }

    let exists = Fragment::sql("SELECT to_regclass('migrations') IS NOT NULL AS \"present\"");
    let present = db
        .query_as::<Exists>(&exists)
        .await?
        .first()
        .is_some_and(|row| row.present);

    let applied = if present {
        db.collection::<MigrationRecord>()?
            .find_all(Filter::all(), &FindOptions::new().order(Order::asc("id")))
            .await?
    } else {
        Vec::new()
    };

    let pending = if migrations.is_empty() {
        Vec::new()
    } else {
        let last = applied.last().map(|record| record.name.as_str());
        pending_after(last, migrations)?
            .iter()
            .map(|m| m.name.clone())
            .collect()
    };

    Ok(MigrationStatus { applied, pending })
}
