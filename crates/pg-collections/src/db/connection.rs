//! Connection-provider seam.
//!
//! The engine never talks to a driver directly. It acquires a [`Connection`]
//! from a [`ConnectionProvider`], executes positional-parameter SQL on it and
//! releases it by dropping it. [`super::postgres::PgProvider`] is the
//! production implementation; tests plug in a scripted provider.

use async_trait::async_trait;

use crate::core::{Row, SqlValue};
use crate::error::Result;

/// One checked-out connection. Dropping it releases it back to the provider.
#[async_trait]
pub trait Connection: Send {
    /// Execute one statement with positional values and return its rows.
    async fn execute(&mut self, sql: &str, values: &[SqlValue]) -> Result<Vec<Row>>;

    /// Execute a multi-statement script verbatim, without parameters.
    async fn execute_script(&mut self, sql: &str) -> Result<()>;
}

/// Source of connections, usually a pool.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn Connection>>;
}
