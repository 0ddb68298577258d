//! Adapter between bb8 and the sqlx::Postgres driver.
use anyhow::Context;
use derive_builder::Builder;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;

use super::schema::{generate_index_ddl, generate_table_ddl};
use super::statement::{bind_record, insert_sql};
use crate::config::{
    CONNECT_TIMEOUT, DDL_LOCK_KEY, DEFAULT_POOL_SIZE, DEFAULT_PORT, PING_TIMEOUT, QUERY_TIMEOUT,
    STATEMENT_TIMEOUT,
};
use crate::formats::ScheduleRecord;

pub type Bb8Connection<'a> = bb8::PooledConnection<'a, ConnectionManager>;

/// Inner pool variants
#[derive(Debug, Clone)]
enum PoolInner {
    Postgres(bb8::Pool<ConnectionManager>),
    #[cfg(test)]
    Sqlite(sqlx::SqlitePool),
}

/// Connection that can be either Postgres or SQLite
///
/// Dropping the value hands the connection back to its pool.
pub enum PoolConnection {
    Postgres(Bb8Connection<'static>),
    #[cfg(test)]
    Sqlite(sqlx::pool::PoolConnection<sqlx::Sqlite>),
}

/// Open transaction on a [`PoolConnection`]
///
/// Dropping it without calling [`PoolTransaction::commit`] rolls it back.
pub enum PoolTransaction<'c> {
    Postgres(sqlx::Transaction<'c, sqlx::Postgres>),
    #[cfg(test)]
    Sqlite(sqlx::Transaction<'c, sqlx::Sqlite>),
}

/// Explicitly passed handle to the destination database
#[derive(Debug, Clone)]
pub struct Pool {
    inner: PoolInner,
}

#[derive(Builder)]
pub struct PoolArgs {
    #[builder(setter(into))]
    host: String,
    #[builder(default = "DEFAULT_PORT")]
    port: u16,
    #[builder(setter(into))]
    username: String,
    #[builder(setter(into), default)]
    password: Option<String>,
    #[builder(setter(into))]
    database: String,
    #[builder(default = "DEFAULT_POOL_SIZE")]
    max_pool_size: u32,
}

pub async fn pool(args: PoolArgs) -> anyhow::Result<Pool> {
    let PoolArgs {
        host,
        port,
        username,
        password,
        database,
        max_pool_size,
    } = args;

    let mut connect_options = PgConnectOptions::new()
        .host(&host)
        .port(port)
        .username(&username)
        .database(&database)
        .options([(
            "statement_timeout",
            format!("{}s", STATEMENT_TIMEOUT.as_secs()),
        )]);
    if let Some(password) = password.as_deref() {
        connect_options = connect_options.password(password);
    }

    let conn_manager = ConnectionManager::new(connect_options);

    // Connections are opened lazily, an unreachable server shows up on the first acquire
    let bb8_pool = bb8::Builder::new()
        .max_size(max_pool_size)
        .connection_timeout(CONNECT_TIMEOUT)
        // Hand connect errors (refused, bad password) back to the caller instead of
        // retrying silently until the timeout swallows the cause
        .retry_connection(false)
        .max_lifetime(Duration::from_secs(60 * 55))
        .build(conn_manager)
        .await
        .context("Failed to create connection pool")?;

    tracing::info!(host, port, database, max_pool_size, "connection pool ready");

    Ok(Pool {
        inner: PoolInner::Postgres(bb8_pool),
    })
}

impl Pool {
    /// Create an in-memory SQLite pool for testing
    ///
    /// A single connection is kept alive for the pool's lifetime; every new
    /// in-memory connection would otherwise see its own empty database.
    #[cfg(test)]
    pub async fn sqlite_in_memory() -> Result<Self, sqlx::Error> {
        let sqlite_pool = sqlx::sqlite::SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Pool {
            inner: PoolInner::Sqlite(sqlite_pool),
        })
    }

    pub async fn acquire(&self) -> Result<PoolConnection, sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => {
                let conn = pool.get_owned().await.map_err(|e| match e {
                    bb8::RunError::User(e) => e,
                    bb8::RunError::TimedOut => sqlx::Error::PoolTimedOut,
                })?;
                Ok(PoolConnection::Postgres(conn))
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let conn = pool.acquire().await?;
                Ok(PoolConnection::Sqlite(conn))
            }
        }
    }
}

impl PoolConnection {
    /// Execute a statement without parameters (DDL such as CREATE TABLE)
    pub async fn execute_query(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        match self {
            PoolConnection::Postgres(conn) => {
                with_timeout(sqlx::query(sql).execute(&mut **conn)).await?;
            }
            #[cfg(test)]
            PoolConnection::Sqlite(conn) => {
                with_timeout(sqlx::query(sql).execute(&mut **conn)).await?;
            }
        }
        Ok(())
    }

    /// Create the destination table if it does not exist yet
    pub async fn ensure_table(&mut self) -> Result<(), sqlx::Error> {
        self.execute_ddl(&generate_table_ddl()).await
    }

    /// Create the `stop_id` index if it does not exist yet
    pub async fn ensure_stop_index(&mut self) -> Result<(), sqlx::Error> {
        self.execute_ddl(&generate_index_ddl()).await
    }

    /// Run a schema statement while holding the loader's DDL lock
    ///
    /// Postgres `IF NOT EXISTS` DDL still races on the system catalogs when two
    /// sessions create the same object at once, so concurrent loaders take a
    /// transaction-scoped advisory lock first.
    async fn execute_ddl(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        match self {
            PoolConnection::Postgres(conn) => {
                let mut tx = Connection::begin(&mut **conn).await?;
                with_timeout(
                    sqlx::query("SELECT pg_advisory_xact_lock($1)")
                        .bind(DDL_LOCK_KEY)
                        .execute(&mut *tx),
                )
                .await?;
                with_timeout(sqlx::query(sql).execute(&mut *tx)).await?;
                with_timeout(tx.commit()).await
            }
            #[cfg(test)]
            PoolConnection::Sqlite(conn) => {
                with_timeout(sqlx::query(sql).execute(&mut **conn)).await?;
                Ok(())
            }
        }
    }

    pub async fn begin(&mut self) -> Result<PoolTransaction<'_>, sqlx::Error> {
        match self {
            PoolConnection::Postgres(conn) => {
                let tx = Connection::begin(&mut **conn).await?;
                Ok(PoolTransaction::Postgres(tx))
            }
            #[cfg(test)]
            PoolConnection::Sqlite(conn) => {
                let tx = Connection::begin(&mut **conn).await?;
                Ok(PoolTransaction::Sqlite(tx))
            }
        }
    }
}

impl PoolTransaction<'_> {
    /// Insert `records` with a single multi-row statement
    ///
    /// Returns the number of rows the server reports as inserted.
    pub async fn insert_batch(&mut self, records: &[ScheduleRecord]) -> Result<u64, sqlx::Error> {
        if records.is_empty() {
            return Ok(0);
        }

        let sql = insert_sql(records.len());
        match self {
            PoolTransaction::Postgres(tx) => {
                let mut query = sqlx::query(&sql);
                for record in records {
                    query = bind_record(query, record);
                }
                let result = with_timeout(query.execute(&mut **tx)).await?;
                Ok(result.rows_affected())
            }
            #[cfg(test)]
            PoolTransaction::Sqlite(tx) => {
                let mut query = sqlx::query(&sql);
                for record in records {
                    query = bind_record(query, record);
                }
                let result = with_timeout(query.execute(&mut **tx)).await?;
                Ok(result.rows_affected())
            }
        }
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        match self {
            PoolTransaction::Postgres(tx) => with_timeout(tx.commit()).await,
            #[cfg(test)]
            PoolTransaction::Sqlite(tx) => with_timeout(tx.commit()).await,
        }
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            PoolTransaction::Postgres(tx) => tx.rollback().await,
            #[cfg(test)]
            PoolTransaction::Sqlite(tx) => tx.rollback().await,
        }
    }
}

/// Bound a database call by `QUERY_TIMEOUT`
async fn with_timeout<T>(
    fut: impl std::future::Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, sqlx::Error> {
    tokio::time::timeout(QUERY_TIMEOUT, fut)
        .await
        // Surface client-side timeouts the same way as pool timeouts
        .map_err(|_| sqlx::Error::PoolTimedOut)
        .and_then(|result| result)
}

// Wrap `PgConnectOptions` so that we can implement the bb8::ManageConnection trait.
pub struct ConnectionManager {
    connect_options: PgConnectOptions,
}

impl ConnectionManager {
    /// Create a new `ConnectionManager` with the specified connect options.
    pub fn new(connect_options: PgConnectOptions) -> Self {
        Self { connect_options }
    }
}

impl bb8::ManageConnection for ConnectionManager {
    type Connection = PgConnection;
    type Error = sqlx::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        tokio::time::timeout(CONNECT_TIMEOUT, self.connect_options.connect())
            .await
            .map_err(|_| sqlx::Error::PoolTimedOut)?
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        tokio::time::timeout(PING_TIMEOUT, Connection::ping(conn))
            .await
            // Convert tokio timeouts into sqlx pool timeouts. bb8 will retry a different connection on ping failure.
            .map_err(|_| sqlx::Error::PoolTimedOut)
            // Make sure that we also look at the actual ping result
            .and_then(|result| result)?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        // sqlx::PgConnection provides no non-async way to check for closed/broken connections.
        false
    }
}
