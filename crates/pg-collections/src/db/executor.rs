//! Bound query functions.
//!
//! A [`QueryExecutor`] is what collections hold on to: the root registry's
//! executor checks a connection out of the provider for every call, the
//! transaction registry's executor is pinned to one connection.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::connection::{Connection, ConnectionProvider};
use crate::core::{Fragment, Row, Statement};
use crate::error::{OrmError, Result};

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Serialize and execute a fragment, returning its rows.
    async fn query(&self, fragment: &Fragment) -> Result<Vec<Row>>;

    /// Execute a raw multi-statement script.
    async fn execute_script(&self, sql: &str) -> Result<()>;
}

/// Wrap an execution failure with the statement that caused it.
pub(crate) fn query_error(stmt: &Statement, err: OrmError) -> OrmError {
    match err {
        err @ OrmError::Query { .. } => err,
        other => OrmError::Query {
            sql: stmt.sql.clone(),
            values: format!("{:?}", stmt.values),
            message: other.to_string(),
        },
    }
}

fn script_error(sql: &str, err: OrmError) -> OrmError {
    query_error(
        &Statement {
            sql: sql.to_string(),
            values: Vec::new(),
        },
        err,
    )
}

async fn run(conn: &mut dyn Connection, stmt: &Statement) -> Result<Vec<Row>> {
    debug!("Executing: {} ({} params)", stmt.sql, stmt.values.len());
    conn.execute(&stmt.sql, &stmt.values)
        .await
        .map_err(|e| query_error(stmt, e))
}

/// Acquires a connection per call and releases it afterwards.
pub struct PoolExecutor {
    provider: Arc<dyn ConnectionProvider>,
}

impl PoolExecutor {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl QueryExecutor for PoolExecutor {
    async fn query(&self, fragment: &Fragment) -> Result<Vec<Row>> {
        let stmt = fragment.to_statement();
        let mut conn = self.provider.acquire().await?;
        run(conn.as_mut(), &stmt).await
    }

    async fn execute_script(&self, sql: &str) -> Result<()> {
        let mut conn = self.provider.acquire().await?;
        debug!("Executing script ({} bytes)", sql.len());
        conn.execute_script(sql).await.map_err(|e| script_error(sql, e))
    }
}

/// Lifecycle of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    Began,
    Committed,
    RolledBack,
}

impl TransactionStatus {
    fn closed_error(self) -> OrmError {
        OrmError::TransactionClosed(match self {
            TransactionStatus::Idle => "idle",
            TransactionStatus::Began => "open",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RolledBack => "rolled back",
        })
    }
}

struct PinnedState {
    conn: Option<Box<dyn Connection>>,
    status: TransactionStatus,
}

/// Executes every statement on one dedicated connection, in issue order.
///
/// The connection is released exactly once, when the transaction commits or
/// rolls back. Statements issued after that fail with
/// [`OrmError::TransactionClosed`].
pub struct TransactionExecutor {
    state: Mutex<PinnedState>,
}

impl TransactionExecutor {
    pub(crate) fn new(conn: Box<dyn Connection>) -> Self {
        Self {
            state: Mutex::new(PinnedState {
                conn: Some(conn),
                status: TransactionStatus::Idle,
            }),
        }
    }

    pub async fn status(&self) -> TransactionStatus {
        self.state.lock().await.status
    }

    pub(crate) async fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.status != TransactionStatus::Idle {
            return Err(state.status.closed_error());
        }
        let conn = state
            .conn
            .as_mut()
            .ok_or(OrmError::TransactionClosed("released"))?;
        run(conn.as_mut(), &Fragment::sql("BEGIN").to_statement()).await?;
        state.status = TransactionStatus::Began;
        Ok(())
    }

    /// `COMMIT` and release. On failure the connection is kept so the caller
    /// can still roll back.
    pub(crate) async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.status != TransactionStatus::Began {
            return Err(state.status.closed_error());
        }
        let conn = state
            .conn
            .as_mut()
            .ok_or(OrmError::TransactionClosed("released"))?;
        run(conn.as_mut(), &Fragment::sql("COMMIT").to_statement()).await?;
        state.status = TransactionStatus::Committed;
        state.conn = None;
        Ok(())
    }

    /// `ROLLBACK` and release. The connection is released even when the
    /// rollback statement itself fails.
    pub(crate) async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(mut conn) = state.conn.take() else {
            return Ok(());
        };
        state.status = TransactionStatus::RolledBack;
        run(conn.as_mut(), &Fragment::sql("ROLLBACK").to_statement())
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl QueryExecutor for TransactionExecutor {
    async fn query(&self, fragment: &Fragment) -> Result<Vec<Row>> {
        let stmt = fragment.to_statement();
        let mut state = self.state.lock().await;
        if state.status != TransactionStatus::Began {
            return Err(state.status.closed_error());
        }
        match state.conn.as_mut() {
            Some(conn) => run(conn.as_mut(), &stmt).await,
            None => Err(OrmError::TransactionClosed("released")),
        }
    }

    async fn execute_script(&self, sql: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.status != TransactionStatus::Began {
            return Err(state.status.closed_error());
        }
        let conn = state
            .conn
            .as_mut()
            .ok_or(OrmError::TransactionClosed("released"))?;
        debug!("Executing script ({} bytes)", sql.len());
        conn.execute_script(sql).await.map_err(|e| script_error(sql, e))
    }
}
