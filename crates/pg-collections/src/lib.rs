//! # pg-collections
//!
//! Typed collections over PostgreSQL.
//!
//! - **SQL fragments** that keep statement text and bound values apart
//! - **Filter compilation** from a small operator DSL to `WHERE` clauses
//! - **Batched id lookups** coalescing concurrent `find_by_id` calls
//! - **Transactions** with a scoped registry and rollback hooks
//! - **Migrations** applied in order with drift detection
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_collections::{init_database, Config, Entity, Id, Where};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     id: Id,
//!     login: String,
//! }
//!
//! impl Entity for User {
//!     const TABLE: &'static str = "users";
//!     fn id(&self) -> &Id {
//!         &self.id
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> pg_collections::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let db = init_database(&config).await?.db;
//!     let users = db.collection::<User>()?;
//!     let user = users.find_one(Where::new().eq("login", "cevek")).await?;
//!     println!("{}", user.id.as_str());
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod collection;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod loader;
pub mod migrate;
pub mod query;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use bootstrap::{init_database, migrate_database, wait_until_ready, Initialized};
pub use collection::{generate_id, Collection, Entity};
pub use config::{Config, DatabaseConfig, MigrationsConfig, StartupConfig};
pub use crate::core::{quote_identifier, Fragment, Id, RawIdentifier, Row, SqlValue};
pub use db::{ConnectionProvider, Database, PgProvider, Transaction, TransactionStatus};
pub use error::{OrmError, Result};
pub use loader::CoalescingLoader;
pub use migrate::{
    apply_migrations, discover_migrations, pending_migrations, Migration, MigrationRecord,
    MigrationStatus,
};
pub use query::{
    ColumnKind, CreateOptions, Filter, FindOptions, OnConflict, OperatorSet, Order, Patch, Where,
};
