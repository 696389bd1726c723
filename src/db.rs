//! Database access
//!
//! Administrative pool setup and the project registry.

pub mod queries;
pub mod service;

pub use service::{PgProjectStore, ProjectRecord, ProjectStore};

use crate::config::{DatabaseConfig, PoolConfig};
use crate::error::AppError;
use crate::pool::create_deadpool;
use deadpool_postgres::Pool;
use tracing::info;

/// Create and verify the administrative pool used for registry lookups
pub async fn connect_admin_pool(config: &DatabaseConfig, limits: &PoolConfig) -> Result<Pool, AppError> {
    let limits = PoolConfig {
        max_size: config.max_pool_size,
        ..limits.clone()
    };
    let pool = create_deadpool(&config.target(), &limits)?;

    // Test connection
    let client = pool.get().await?;
    client.query_one(queries::PING, &[]).await?;
    drop(client);

    info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        max_size = limits.max_size,
        "Admin connection pool established"
    );
    Ok(pool)
}
