//! ABOUTME: SQLite adapter that exposes a sqlx pool as an instrumentable handle
//! ABOUTME: Runs every statement through the lifecycle hook chain

use std::str::FromStr;
use std::sync::Arc;

use qg_config::DatabaseConfig;
use qg_core::{Error, Result};
use qg_metrics::{
    register_interface, Callbacks, CollectorRegistry, Database, Instrumentation, Operation,
    OperationKind, PluginOptions, PoolStats,
};
use sqlx::{
    pool::PoolConnection,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Sqlite, SqlitePool,
};
use tracing::{debug, info, instrument};

/// Driver identifier exported as the `driver` label
pub const DRIVER_NAME: &str = "sqlite";

/// SQLite connection pool whose statements pass through a hook chain
#[derive(Debug)]
pub struct SqliteDatabase {
    pool: SqlitePool,
    callbacks: Callbacks,
}

impl SqliteDatabase {
    /// Open a pool for `url`, e.g. `sqlite::memory:` or `sqlite://data.db`
    #[instrument(skip(url), fields(url = %url))]
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to database");

        let connect_options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Config(format!("Invalid database url '{}': {}", url, e)))?
            .create_if_missing(true)
            .pragma("foreign_keys", "ON")
            .pragma("busy_timeout", "30000");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(|e| Error::Database(format!("Failed to create connection pool: {}", e)))?;

        info!(max_connections, "Database pool ready");
        Ok(Self::from_pool(pool))
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::connect(&config.url, config.pool_size).await
    }

    /// Wrap an existing pool (for testing/reuse)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            callbacks: Callbacks::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run an INSERT or DDL statement, returning the affected row count
    pub async fn create(&self, sql: &str) -> Result<u64> {
        self.execute(OperationKind::Create, sql).await
    }

    pub async fn update(&self, sql: &str) -> Result<u64> {
        self.execute(OperationKind::Update, sql).await
    }

    pub async fn delete(&self, sql: &str) -> Result<u64> {
        self.execute(OperationKind::Delete, sql).await
    }

    /// Run a SELECT statement and return every row
    pub async fn query(&self, sql: &str) -> Result<Vec<SqliteRow>> {
        let mut op = Operation::new(OperationKind::Query);
        self.callbacks.run_before(&mut op);

        let result = match self.acquire(&mut op).await {
            Ok(mut conn) => sqlx::query(sql)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| Error::Database(format!("query failed: {}", e))),
            Err(e) => Err(e),
        };

        self.callbacks.run_after(&mut op);
        result
    }

    async fn execute(&self, kind: OperationKind, sql: &str) -> Result<u64> {
        let mut op = Operation::new(kind);
        self.callbacks.run_before(&mut op);

        let result = match self.acquire(&mut op).await {
            Ok(mut conn) => sqlx::query(sql)
                .execute(&mut *conn)
                .await
                .map(|done| done.rows_affected())
                .map_err(|e| Error::Database(format!("{} failed: {}", kind, e))),
            Err(e) => Err(e),
        };

        self.callbacks.run_after(&mut op);
        result
    }

    /// A failed acquire is the operation's connection failure
    async fn acquire(&self, op: &mut Operation) -> Result<PoolConnection<Sqlite>> {
        match self.pool.acquire().await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                let reason = e.to_string();
                debug!(kind = %op.kind(), error = %reason, "Could not acquire connection");
                op.fail_connection(reason.clone());
                Err(Error::Connection(reason))
            }
        }
    }
}

impl Database for SqliteDatabase {
    fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    fn driver_name(&self) -> &str {
        DRIVER_NAME
    }

    fn pool_stats(&self) -> Result<PoolStats> {
        if self.pool.is_closed() {
            return Err(Error::Connection("connection pool is closed".to_string()));
        }

        let open = i64::from(self.pool.size());
        let idle = self.pool.num_idle() as i64;

        Ok(PoolStats {
            open,
            idle,
            in_use: (open - idle).max(0),
        })
    }
}

/// Instrument `db` under `db_name`
pub fn instrument(
    registry: &CollectorRegistry,
    db: &Arc<SqliteDatabase>,
    db_name: &str,
    opts: PluginOptions,
) -> Result<Instrumentation> {
    let handle: Arc<dyn Database> = Arc::clone(db) as Arc<dyn Database>;
    register_interface(registry, Some(handle), db_name, opts)
}
