//! Collection registries and transactions.
//!
//! A registry lazily builds one [`Collection`] per entity table and keeps it
//! for its own lifetime. The root [`Database`] registry runs every statement
//! on a freshly acquired pool connection; each [`Transaction`] gets a brand
//! new registry pinned to its own connection, so loaders are never shared
//! between the root scope and a transaction, or between two transactions.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::connection::ConnectionProvider;
use super::executor::{PoolExecutor, QueryExecutor, TransactionExecutor, TransactionStatus};
use crate::collection::{Collection, Entity};
use crate::core::{Fragment, Row};
use crate::error::{OrmError, Result};

type CollectionMap = HashMap<&'static str, Arc<dyn Any + Send + Sync>>;

/// Lazy per-table collection cache bound to one executor.
struct Registry {
    executor: Arc<dyn QueryExecutor>,
    collections: Mutex<CollectionMap>,
}

impl Registry {
    fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor,
            collections: Mutex::new(HashMap::new()),
        }
    }

    fn collection<T: Entity>(&self) -> Result<Arc<Collection<T>>> {
        let mut collections = self
            .collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = collections.get(T::TABLE) {
            return existing.clone().downcast::<Collection<T>>().map_err(|_| {
                OrmError::exception(
                    "CollectionTypeMismatch",
                    format!(
                        "table {} is already registered for another entity type than {}",
                        T::TABLE,
                        std::any::type_name::<T>()
                    ),
                )
            });
        }
        let collection = Arc::new(Collection::<T>::new(self.executor.clone())?);
        collections.insert(T::TABLE, collection.clone());
        Ok(collection)
    }

    async fn query_as<R: DeserializeOwned>(&self, fragment: &Fragment) -> Result<Vec<R>> {
        self.executor
            .query(fragment)
            .await?
            .into_iter()
            .map(|row| {
                serde_json::from_value(JsonValue::Object(row)).map_err(|e| OrmError::Decode {
                    collection: "query".to_string(),
                    message: e.to_string(),
                })
            })
            .collect()
    }
}

/// Root registry over a connection provider.
#[derive(Clone)]
pub struct Database {
    provider: Arc<dyn ConnectionProvider>,
    registry: Arc<Registry>,
}

impl Database {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        let executor = Arc::new(PoolExecutor::new(provider.clone()));
        Self {
            provider,
            registry: Arc::new(Registry::new(executor)),
        }
    }

    /// The collection for `T`, built on first use.
    pub fn collection<T: Entity>(&self) -> Result<Arc<Collection<T>>> {
        self.registry.collection::<T>()
    }

    pub async fn query(&self, fragment: &Fragment) -> Result<Vec<Row>> {
        self.registry.executor.query(fragment).await
    }

    pub async fn query_as<R: DeserializeOwned>(&self, fragment: &Fragment) -> Result<Vec<R>> {
        self.registry.query_as(fragment).await
    }

    pub async fn execute_script(&self, sql: &str) -> Result<()> {
        self.registry.executor.execute_script(sql).await
    }

    /// Run `body` inside `BEGIN`/`COMMIT` on a dedicated connection.
    ///
    /// Any error from `body` (or from `BEGIN`/`COMMIT`) rolls the transaction
    /// back and is returned unchanged.
    pub async fn transaction<R, E, F, Fut>(&self, body: F) -> std::result::Result<R, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: From<OrmError>,
    {
        self.run_transaction(body, None::<fn() -> std::future::Ready<Result<()>>>)
            .await
    }

    /// Like [`Database::transaction`], running `on_rollback` after a rollback.
    /// A failing hook is logged and never replaces the body's error.
    pub async fn transaction_with_rollback<R, E, F, Fut, H, HFut, HE>(
        &self,
        body: F,
        on_rollback: H,
    ) -> std::result::Result<R, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: From<OrmError>,
        H: FnOnce() -> HFut,
        HFut: Future<Output = std::result::Result<(), HE>>,
        HE: Display,
    {
        self.run_transaction(body, Some(on_rollback)).await
    }

    async fn run_transaction<R, E, F, Fut, H, HFut, HE>(
        &self,
        body: F,
        on_rollback: Option<H>,
    ) -> std::result::Result<R, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: From<OrmError>,
        H: FnOnce() -> HFut,
        HFut: Future<Output = std::result::Result<(), HE>>,
        HE: Display,
    {
        let conn = self.provider.acquire().await?;
        let executor = Arc::new(TransactionExecutor::new(conn));
        let tx = Transaction {
            executor: executor.clone(),
            registry: Arc::new(Registry::new(executor.clone())),
        };

        match run_body(&executor, tx, body).await {
            Ok(value) => {
                debug!("Transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = executor.rollback().await {
                    warn!("Rollback failed: {}", e);
                }
                debug!("Transaction rolled back");
                if let Some(hook) = on_rollback {
                    if let Err(e) = hook().await {
                        warn!("Rollback hook failed: {}", e);
                    }
                }
                Err(err)
            }
        }
    }
}

async fn run_body<R, E, F, Fut>(
    executor: &TransactionExecutor,
    tx: Transaction,
    body: F,
) -> std::result::Result<R, E>
where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = std::result::Result<R, E>>,
    E: From<OrmError>,
{
    executor.begin().await?;
    let value = body(tx).await?;
    executor.commit().await?;
    Ok(value)
}

/// Registry bound to one open transaction.
///
/// Cloning is cheap; every clone shares the connection. Once the
/// transaction commits or rolls back, every operation fails with
/// [`OrmError::TransactionClosed`].
#[derive(Clone)]
pub struct Transaction {
    executor: Arc<TransactionExecutor>,
    registry: Arc<Registry>,
}

impl Transaction {
    pub fn collection<T: Entity>(&self) -> Result<Arc<Collection<T>>> {
        self.registry.collection::<T>()
    }

    pub async fn query(&self, fragment: &Fragment) -> Result<Vec<Row>> {
        self.executor.query(fragment).await
    }

    pub async fn query_as<R: DeserializeOwned>(&self, fragment: &Fragment) -> Result<Vec<R>> {
        self.registry.query_as(fragment).await
    }

    pub async fn execute_script(&self, sql: &str) -> Result<()> {
        self.executor.execute_script(sql).await
    }

    pub async fn status(&self) -> TransactionStatus {
        self.executor.status().await
    }
}
