//! PostgreSQL connection provider over a `deadpool-postgres` pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rustls::ClientConfig;
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionProvider};
use crate::config::DatabaseConfig;
use crate::core::{Row, SqlValue};
use crate::error::{OrmError, Result};

/// SSL verification modes, matching PostgreSQL's `sslmode` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// TLS without certificate verification.
    Require,
    /// TLS with certificate verification.
    VerifyCa,
    /// TLS with certificate and hostname verification.
    VerifyFull,
}

impl SslMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disable" | "" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(OrmError::Config(format!(
                "Invalid ssl_mode '{}'. Valid values: disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }

    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Client TLS settings for the mode, or `None` when TLS is disabled.
    pub fn client_config(&self) -> Option<ClientConfig> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        match self {
            SslMode::Disable => None,
            SslMode::Require => {
                warn!(
                    "ssl_mode=require enables TLS but does NOT verify the server certificate; \
                     use verify-full outside development"
                );
                Some(
                    ClientConfig::builder()
                        .dangerous()
                        .with_custom_certificate_verifier(Arc::new(NoVerifier))
                        .with_no_client_auth(),
                )
            }
            SslMode::VerifyCa | SslMode::VerifyFull => {
                if *self == SslMode::VerifyCa {
                    warn!("ssl_mode=verify-ca also verifies the hostname (same as verify-full)");
                }
                Some(
                    ClientConfig::builder()
                        .with_root_certificates(root_store)
                        .with_no_client_auth(),
                )
            }
        }
    }
}

/// Accepts any server certificate. Only used for `ssl_mode=require`.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// Production [`ConnectionProvider`] backed by a `deadpool-postgres` pool.
#[derive(Clone)]
pub struct PgProvider {
    pool: Pool,
}

impl PgProvider {
    /// Build the pool. Connections are opened lazily on first acquire.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        if let Some(password) = &config.password {
            pg_config.password(password);
        }
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let mgr = match ssl_mode.client_config() {
            None => Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config),
            Some(tls) => Manager::from_config(pg_config, MakeRustlsConnect::new(tls), mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| OrmError::pool(e, "creating PostgreSQL pool"))?;

        info!(
            "PostgreSQL pool ready: {}:{}/{} (max {} connections, ssl_mode={})",
            config.host, config.port, config.database, config.pool_size, config.ssl_mode
        );
        Ok(Self { pool })
    }

    /// Round-trip `SELECT 1` on a pooled connection, returning its latency.
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| OrmError::pool(e, "acquiring connection for health check"))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| OrmError::pool(driver_message(&e), "running health check"))?;
        Ok(started.elapsed())
    }
}

#[async_trait]
impl ConnectionProvider for PgProvider {
    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| OrmError::pool(e, "acquiring PostgreSQL connection"))?;
        Ok(Box::new(PgConnection {
            client: Some(client),
            in_transaction: false,
        }))
    }
}

/// The server's message when there is one, the driver's otherwise.
fn driver_message(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => format!("{} ({})", db.message(), db.code().code()),
        None => err.to_string(),
    }
}

struct PgConnection {
    client: Option<Object>,
    in_transaction: bool,
}

impl PgConnection {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| OrmError::pool("connection already released", "executing statement"))
    }

    fn track(&mut self, sql: &str) {
        match sql.trim().to_ascii_uppercase().as_str() {
            "BEGIN" => self.in_transaction = true,
            "COMMIT" | "ROLLBACK" => self.in_transaction = false,
            _ => {}
        }
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&mut self, sql: &str, values: &[SqlValue]) -> Result<Vec<Row>> {
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        let rows = self
            .client()?
            .query(sql, &params)
            .await
            .map_err(|e| OrmError::exception("PostgresError", driver_message(&e)))?;
        self.track(sql);

        rows.iter()
            .map(|row| {
                let mut out = Row::new();
                for (idx, column) in row.columns().iter().enumerate() {
                    let value: SqlValue = row
                        .try_get(idx)
                        .map_err(|e| OrmError::exception("PostgresError", e.to_string()))?;
                    out.insert(column.name().to_string(), value.to_json());
                }
                Ok(out)
            })
            .collect()
    }

    async fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.client()?
            .batch_execute(sql)
            .await
            .map_err(|e| OrmError::exception("PostgresError", driver_message(&e)))
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if self.in_transaction {
                debug!("Detaching connection dropped inside an open transaction");
                drop(Object::take(client));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_parsing() {
        assert_eq!(SslMode::parse("disable").unwrap(), SslMode::Disable);
        assert_eq!(SslMode::parse("REQUIRE").unwrap(), SslMode::Require);
        assert_eq!(SslMode::parse("verify-ca").unwrap(), SslMode::VerifyCa);
        assert_eq!(SslMode::parse("verify-full").unwrap(), SslMode::VerifyFull);
        assert_eq!(SslMode::parse("").unwrap(), SslMode::Disable);
        assert!(matches!(SslMode::parse("prefer"), Err(OrmError::Config(_))));
    }

    #[test]
    fn test_client_config_per_mode() {
        assert!(SslMode::Disable.client_config().is_none());
        assert!(SslMode::Require.client_config().is_some());
        assert!(SslMode::VerifyFull.client_config().is_some());
    }

    #[tokio::test]
    async fn test_pool_builds_without_connecting() {
        let config = DatabaseConfig {
            host: "127.0.0.1".into(),
            port: 1,
            database: "app".into(),
            user: "app".into(),
            password: None,
            ssl_mode: "disable".into(),
            pool_size: 2,
            connect_timeout_secs: 1,
        };
        let provider = PgProvider::connect(&config).unwrap();
        assert!(provider.acquire().await.is_err());
    }
}
