//! In-memory connection provider for unit tests.
//!
//! Records every statement executed on any of its connections and answers
//! through a caller-supplied responder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::core::{Row, SqlValue};
use crate::db::connection::{Connection, ConnectionProvider};
use crate::error::Result;

type Responder = dyn Fn(&str, &[SqlValue]) -> Result<Vec<Row>> + Send + Sync;

#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

pub struct ScriptedProvider {
    log: Arc<Mutex<Vec<Executed>>>,
    responder: Arc<Responder>,
    acquired: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(
        responder: impl Fn(&str, &[SqlValue]) -> Result<Vec<Row>> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
            acquired: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// A provider whose statements all succeed with no rows.
    pub fn empty() -> Arc<Self> {
        Self::new(|_, _| Ok(Vec::new()))
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.log.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.executed().into_iter().map(|e| e.sql).collect()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for ScriptedProvider {
    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            log: self.log.clone(),
            responder: self.responder.clone(),
            released: self.released.clone(),
        }))
    }
}

struct ScriptedConnection {
    log: Arc<Mutex<Vec<Executed>>>,
    responder: Arc<Responder>,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn execute(&mut self, sql: &str, values: &[SqlValue]) -> Result<Vec<Row>> {
        self.log.lock().unwrap().push(Executed {
            sql: sql.to_string(),
            values: values.to_vec(),
        });
        (self.responder)(sql, values)
    }

    async fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.execute(sql, &[]).await.map(|_| ())
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Build a row from a JSON object literal.
pub fn row(value: JsonValue) -> Row {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("row literal must be an object, got {}", other),
    }
}
