//! Connection provider: instance name -> open PostgreSQL connection.
//!
//! Every call opens a fresh connection. There is no pool: discovery and
//! conflict checks each read the server state at the moment of their own
//! query, and the returned [`PgConnection`] closes itself when dropped.

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config as PgConfig, Connection, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{Config, InstanceConfig};
use crate::error::{PreflightError, Result};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::tls::SslMode;

/// Default administrative database, used when no database is requested.
pub const MAINTENANCE_DATABASE: &str = "postgres";

/// An open connection. Dropping it closes the client and stops the driver
/// task, whichever way the owning scope exits.
pub struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
    instance: String,
    database: String,
    server_version: String,
}

impl PgConnection {
    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }
}

impl Deref for PgConnection {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Await `fut` unless `cancel` fires first.
pub async fn cancellable<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    PreflightError: From<E>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(PreflightError::Cancelled),
        res = fut => res.map_err(PreflightError::from),
    }
}

/// Resolves instance names from the configuration to live connections.
#[derive(Clone)]
pub struct ConnectionProvider {
    config: Arc<Config>,
    policy: RetryPolicy,
}

impl ConnectionProvider {
    pub fn new(config: Arc<Config>) -> Self {
        let policy = RetryPolicy::from_config(&config.replication);
        Self { config, policy }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Open a connection to `instance`, on `database` or the maintenance
    /// database.
    ///
    /// Unknown instances fail at once. Transient open failures are retried
    /// with exponential backoff; the final error is returned when the
    /// attempts run out.
    pub async fn connect(
        &self,
        instance: &str,
        database: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PgConnection> {
        let instance_config = self
            .config
            .instance(instance)
            .ok_or_else(|| PreflightError::UnknownInstance(instance.to_string()))?;

        let ssl_mode = SslMode::parse(&instance_config.ssl_mode)?;
        let tls = ssl_mode.connector()?;
        let database = database.unwrap_or(MAINTENANCE_DATABASE);
        let connect_timeout = Duration::from_secs(self.config.replication.connect_timeout_seconds);
        let pg_config = build_pg_config(instance_config, database, ssl_mode, connect_timeout);

        debug!("Creating connection to {} {}", instance, database);

        let conn = retry_with_backoff(&self.policy, cancel, PreflightError::is_transient, |_| {
            open(instance, database, &pg_config, tls.clone(), cancel)
        })
        .await?;

        info!(
            "Connected to {} (PostgreSQL {}) {}",
            instance, conn.server_version, database
        );
        Ok(conn)
    }

    /// Open a connection and run a trivial query. Never fails: every error,
    /// including retry exhaustion, is logged and reported as `false`.
    pub async fn test_connection(&self, instance: &str, cancel: &CancellationToken) -> bool {
        let round_trip = async {
            let conn = self.connect(instance, None, cancel).await?;
            cancellable(cancel, conn.simple_query("SELECT 1")).await?;
            Ok::<_, PreflightError>(())
        };

        match round_trip.await {
            Ok(()) => true,
            Err(e) => {
                error!("Connection test failed for instance {}: {}", instance, e);
                false
            }
        }
    }

    /// Names of the user databases on an instance, ordered by name.
    pub async fn list_databases(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let conn = self.connect(instance, None, cancel).await?;

        let query = r#"
            SELECT datname
            FROM pg_database
            WHERE datistemplate = false
            AND datname NOT IN ('postgres', 'template0', 'template1')
            ORDER BY datname
        "#;

        let rows = cancellable(cancel, conn.query(query, &[])).await?;
        let databases = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        info!(
            "Found {} databases on {}: {}",
            databases.len(),
            instance,
            databases.join(", ")
        );
        Ok(databases)
    }
}

fn build_pg_config(
    instance: &InstanceConfig,
    database: &str,
    ssl_mode: SslMode,
    connect_timeout: Duration,
) -> PgConfig {
    let mut pg_config = PgConfig::new();
    pg_config
        .host(&instance.server)
        .port(instance.port)
        .user(&instance.username)
        .password(&instance.password)
        .dbname(database)
        .ssl_mode(ssl_mode.driver_mode())
        .connect_timeout(connect_timeout)
        .application_name("pg-preflight");
    pg_config
}

/// One connection attempt, including the server version lookup.
async fn open(
    instance: &str,
    database: &str,
    pg_config: &PgConfig,
    tls: Option<MakeRustlsConnect>,
    cancel: &CancellationToken,
) -> Result<PgConnection> {
    let handshake = async {
        match tls {
            Some(tls) => {
                let (client, connection) = pg_config.connect(tls).await?;
                Ok::<_, tokio_postgres::Error>((client, spawn_driver(connection)))
            }
            None => {
                let (client, connection) = pg_config.connect(NoTls).await?;
                Ok((client, spawn_driver(connection)))
            }
        }
    };

    let (client, driver) = tokio::select! {
        _ = cancel.cancelled() => return Err(PreflightError::Cancelled),
        res = handshake => res.map_err(|e| PreflightError::connection(instance, e))?,
    };

    let mut conn = PgConnection {
        client,
        driver,
        instance: instance.to_string(),
        database: database.to_string(),
        server_version: String::new(),
    };

    let row = cancellable(cancel, conn.client.query_one("SHOW server_version", &[])).await?;
    conn.server_version = row.try_get(0)?;
    Ok(conn)
}

fn spawn_driver<S, T>(connection: Connection<S, T>) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("PostgreSQL connection closed with error: {}", e);
        }
    })
}
