//! Connection seam, executors, registries and the PostgreSQL provider.

pub mod connection;
pub mod executor;
pub mod postgres;
pub mod registry;

pub use connection::{Connection, ConnectionProvider};
pub use executor::{PoolExecutor, QueryExecutor, TransactionExecutor, TransactionStatus};
pub use postgres::{PgProvider, SslMode};
pub use registry::{Database, Transaction};
