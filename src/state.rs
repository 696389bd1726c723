//! Application state management
//!
//! Contains shared state accessible across all handlers. Everything that was
//! process-global in spirit (ledger, pool cache) is constructed here once and
//! owned by the state.

use crate::config::{EnvConfigProvider, EnvironmentConfigProvider, PoolConfig};
use crate::credentials::{CredentialResolver, FallbackLedger};
use crate::db::{PgProjectStore, ProjectStore};
use crate::pool::{DeadpoolFactory, PoolRouter};
use deadpool_postgres::Pool;
use std::sync::Arc;
use tracing::info;

/// Application state shared across all handlers
pub struct AppState {
    /// Administrative pool used for registry lookups
    pub admin_pool: Pool,

    pub projects: Arc<dyn ProjectStore>,

    pub ledger: Arc<FallbackLedger>,

    pub credentials: Arc<CredentialResolver>,

    /// One pool per (database, read-only) key
    pub pools: PoolRouter<DeadpoolFactory>,
}

impl AppState {
    /// Wire the production services around the admin pool
    pub fn new(admin_pool: Pool, limits: PoolConfig) -> Self {
        let projects: Arc<dyn ProjectStore> = Arc::new(PgProjectStore::new(admin_pool.clone()));
        Self::with_services(admin_pool, projects, Arc::new(EnvConfigProvider::new()), limits)
    }

    pub fn with_services(
        admin_pool: Pool,
        projects: Arc<dyn ProjectStore>,
        environment: Arc<dyn EnvironmentConfigProvider>,
        limits: PoolConfig,
    ) -> Self {
        let ledger = Arc::new(FallbackLedger::new());
        let credentials = Arc::new(CredentialResolver::new(environment, ledger.clone()));
        let pools = PoolRouter::new(DeadpoolFactory, credentials.clone(), projects.clone(), limits);

        Self {
            admin_pool,
            projects,
            ledger,
            credentials,
            pools,
        }
    }

    /// Close every pool owned by the state
    pub async fn shutdown(&self) {
        self.pools.shutdown().await;
        self.admin_pool.close();
        info!("Admin connection pool closed");
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
