//! Catalog access for the initialization sequence
//!
//! Every call opens its own small pool against the database it targets and
//! closes it before returning, whatever the outcome.

use crate::config::PoolConfig;
use crate::connection_string::ConnectionTarget;
use crate::db::queries::{self, SqlBuilder};
use crate::pool::create_deadpool;
use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use std::ops::Deref;
use std::time::Duration;
use thiserror::Error;
use tokio_postgres::error::SqlState;
use tracing::debug;

/// Upper bound on connections a scoped pool may open
const SCOPED_POOL_SIZE: usize = 3;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(#[from] tokio_postgres::Error),
}

/// Operations the initializer needs from the database server
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Round trip against the administrative database
    async fn ping(&self) -> Result<(), CatalogError>;

    async fn database_exists(&self, name: &str) -> Result<bool, CatalogError>;

    /// Returns `false` when the database already existed
    async fn create_database(&self, name: &str) -> Result<bool, CatalogError>;

    async fn drop_database(&self, name: &str) -> Result<(), CatalogError>;

    async fn table_exists(&self, database: &str, schema: &str, table: &str) -> Result<bool, CatalogError>;

    /// Run a multi-statement script inside `database`
    async fn execute_script(&self, database: &str, sql: &str) -> Result<(), CatalogError>;
}

/// Pool that is closed when dropped
struct ScopedPool(Pool);

impl Deref for ScopedPool {
    type Target = Pool;

    fn deref(&self) -> &Pool {
        &self.0
    }
}

impl Drop for ScopedPool {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// PostgreSQL catalog reached with the administrative credentials
pub struct PgCatalog {
    admin: ConnectionTarget,
    limits: PoolConfig,
}

impl PgCatalog {
    pub fn new(admin: ConnectionTarget, connect_timeout: Duration) -> Self {
        Self {
            admin,
            limits: PoolConfig {
                max_size: SCOPED_POOL_SIZE,
                connect_timeout,
                ..PoolConfig::default()
            },
        }
    }

    fn scoped(&self, database: &str) -> Result<ScopedPool, CatalogError> {
        let target = self.admin.with_database(database);
        create_deadpool(&target, &self.limits)
            .map(ScopedPool)
            .map_err(|e| CatalogError::Connection(e.to_string()))
    }

    async fn client(pool: &ScopedPool) -> Result<Object, CatalogError> {
        pool.get()
            .await
            .map_err(|e| CatalogError::Connection(e.to_string()))
    }

    fn admin_database(&self) -> &str {
        &self.admin.database_name
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn ping(&self) -> Result<(), CatalogError> {
        let pool = self.scoped(self.admin_database())?;
        let client = Self::client(&pool).await?;
        client.query_one(queries::PING, &[]).await?;
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool, CatalogError> {
        let pool = self.scoped(self.admin_database())?;
        let client = Self::client(&pool).await?;
        let row = client.query_one(queries::DATABASE_EXISTS, &[&name]).await?;
        Ok(row.get(0))
    }

    async fn create_database(&self, name: &str) -> Result<bool, CatalogError> {
        let pool = self.scoped(self.admin_database())?;
        let client = Self::client(&pool).await?;

        match client.batch_execute(&SqlBuilder::create_database(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.code() == Some(&SqlState::DUPLICATE_DATABASE) => {
                debug!(database = name, "Database was created concurrently");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn drop_database(&self, name: &str) -> Result<(), CatalogError> {
        let pool = self.scoped(self.admin_database())?;
        let client = Self::client(&pool).await?;
        client.batch_execute(&SqlBuilder::drop_database(name)).await?;
        Ok(())
    }

    async fn table_exists(&self, database: &str, schema: &str, table: &str) -> Result<bool, CatalogError> {
        let pool = self.scoped(database)?;
        let client = Self::client(&pool).await?;
        let row = client.query_one(queries::TABLE_EXISTS, &[&schema, &table]).await?;
        Ok(row.get(0))
    }

    async fn execute_script(&self, database: &str, sql: &str) -> Result<(), CatalogError> {
        let pool = self.scoped(database)?;
        let client = Self::client(&pool).await?;
        client.batch_execute(sql).await?;
        Ok(())
    }
}
