//! Connection Pool Router
//!
//! Maps a (database, read-only) key to a lazily created, cached connection pool.
//! Every pool for the same key is the same pool: concurrent misses wait on a
//! single creation, and a creation that fails leaves nothing behind so the
//! next request tries again.

use crate::config::PoolConfig;
use crate::connection_string::{parse_connection_string, ConnectionStringError, ConnectionTarget, ParseOptions};
use crate::credentials::{ConnectionStringRequest, CredentialResolver};
use crate::db::ProjectStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

/// Identifies one cached pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolKey {
    pub database_name: String,
    pub read_only: bool,
}

impl PoolKey {
    pub fn new(database_name: impl Into<String>, read_only: bool) -> Self {
        Self {
            database_name: database_name.into(),
            read_only,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_count: usize,
    pub idle_count: usize,
}

impl PoolStats {
    /// Connections currently checked out
    pub fn active_count(&self) -> usize {
        self.total_count.saturating_sub(self.idle_count)
    }

    fn merge(self, other: PoolStats) -> PoolStats {
        PoolStats {
            total_count: self.total_count + other.total_count,
            idle_count: self.idle_count + other.idle_count,
        }
    }
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Failed to create connection pool for database '{database}': {cause}")]
    Creation { database: String, cause: String },

    #[error("Failed to resolve credentials for database '{database}': {cause}")]
    Credentials { database: String, cause: String },

    #[error("Invalid connection string: {0}")]
    ConnectionString(#[from] ConnectionStringError),

    #[error("Connection pool router is shut down")]
    Closed,
}

/// Builds the pools the router caches
#[async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    type Pool: Clone + Send + Sync + 'static;

    /// Create a pool and establish at least one connection
    async fn create_pool(&self, connection_string: &str, limits: &PoolConfig) -> Result<Self::Pool, PoolError>;

    fn stats(&self, pool: &Self::Pool) -> PoolStats;

    fn close(&self, pool: &Self::Pool);
}

struct PoolEntry<P> {
    pool: P,
    limits: PoolConfig,
    created_at: DateTime<Utc>,
    closed: AtomicBool,
}

/// Per-pool summary (safe to expose to clients)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    pub key: PoolKey,
    pub stats: PoolStats,
    pub max_size: usize,
    pub created_at: DateTime<Utc>,
}

type Slot<P> = Arc<OnceCell<PoolEntry<P>>>;

/// Pool Router - one lazily created pool per [`PoolKey`]
pub struct PoolRouter<F: PoolFactory> {
    factory: F,
    resolver: Arc<CredentialResolver>,
    projects: Arc<dyn ProjectStore>,
    limits: PoolConfig,
    pools: RwLock<HashMap<PoolKey, Slot<F::Pool>>>,
    closed: AtomicBool,
}

impl<F: PoolFactory> PoolRouter<F> {
    pub fn new(
        factory: F,
        resolver: Arc<CredentialResolver>,
        projects: Arc<dyn ProjectStore>,
        limits: PoolConfig,
    ) -> Self {
        Self {
            factory,
            resolver,
            projects,
            limits,
            pools: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the pool for a key, creating it on first use
    pub async fn get_pool(&self, key: &PoolKey) -> Result<F::Pool, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let slot = self.slot(key).await;

        match slot.get_or_try_init(|| self.create_entry(key)).await {
            // Shutdown may have drained this slot while the pool was being created
            Ok(entry) if self.is_closed() => {
                self.retire(key, &slot, entry).await;
                Err(PoolError::Closed)
            }
            Ok(entry) => Ok(entry.pool.clone()),
            Err(e) => {
                self.discard_failed(key, &slot).await;
                Err(e)
            }
        }
    }

    /// Combined stats for the read-write and read-only pools of a database
    pub async fn get_pool_stats(&self, database_name: &str) -> Option<PoolStats> {
        let pools = self.pools.read().await;
        [true, false]
            .into_iter()
            .filter_map(|read_only| pools.get(&PoolKey::new(database_name, read_only)))
            .filter_map(|slot| slot.get())
            .map(|entry| self.factory.stats(&entry.pool))
            .reduce(PoolStats::merge)
    }

    /// Stats for exactly one key
    pub async fn get_key_stats(&self, key: &PoolKey) -> Option<PoolStats> {
        let pools = self.pools.read().await;
        pools
            .get(key)
            .and_then(|slot| slot.get())
            .map(|entry| self.factory.stats(&entry.pool))
    }

    /// Summaries of every live pool, ordered by key
    pub async fn list_pools(&self) -> Vec<PoolSummary> {
        let pools = self.pools.read().await;
        let mut summaries: Vec<PoolSummary> = pools
            .iter()
            .filter_map(|(key, slot)| {
                slot.get().map(|entry| PoolSummary {
                    key: key.clone(),
                    stats: self.factory.stats(&entry.pool),
                    max_size: entry.limits.max_size,
                    created_at: entry.created_at,
                })
            })
            .collect();
        summaries.sort_by(|a, b| {
            (&a.key.database_name, a.key.read_only).cmp(&(&b.key.database_name, b.key.read_only))
        });
        summaries
    }

    /// Number of live pools
    pub async fn pool_count(&self) -> usize {
        let pools = self.pools.read().await;
        pools.values().filter(|slot| slot.initialized()).count()
    }

    /// Close every pool, empty the cache and refuse further requests.
    ///
    /// Creations still in flight close their own pool when they finish.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let mut pools = self.pools.write().await;
        let mut closed = 0;
        for (_, slot) in pools.drain() {
            if let Some(entry) = slot.get() {
                if self.close_entry(entry) {
                    closed += 1;
                }
            }
        }
        info!("Closed {} connection pool(s)", closed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close a pool exactly once; false if it was already closed
    fn close_entry(&self, entry: &PoolEntry<F::Pool>) -> bool {
        if entry.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.factory.close(&entry.pool);
        true
    }

    /// Close a pool that finished creating after shutdown began
    async fn retire(&self, key: &PoolKey, slot: &Slot<F::Pool>, entry: &PoolEntry<F::Pool>) {
        let mut pools = self.pools.write().await;
        if pools.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            pools.remove(key);
        }
        if self.close_entry(entry) {
            warn!(database = %key.database_name, read_only = key.read_only, "Closed connection pool created during shutdown");
        }
    }

    async fn slot(&self, key: &PoolKey) -> Slot<F::Pool> {
        {
            let pools = self.pools.read().await;
            if let Some(slot) = pools.get(key) {
                return slot.clone();
            }
        }

        let mut pools = self.pools.write().await;
        pools
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Drop an empty slot unless another caller is still waiting on it
    async fn discard_failed(&self, key: &PoolKey, slot: &Slot<F::Pool>) {
        let mut pools = self.pools.write().await;
        let unused = pools
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(current) <= 2);
        if unused {
            pools.remove(key);
        }
    }

    async fn create_entry(&self, key: &PoolKey) -> Result<PoolEntry<F::Pool>, PoolError> {
        let credentials_error = |cause: String| PoolError::Credentials {
            database: key.database_name.clone(),
            cause,
        };

        let project = self
            .projects
            .find_by_database_name(&key.database_name)
            .await
            .map_err(|e| credentials_error(e.to_string()))?;

        let project_ref = project
            .as_ref()
            .map(|p| p.project_ref.clone())
            .unwrap_or_else(|| key.database_name.clone());

        let mut request = ConnectionStringRequest::new(&key.database_name, project_ref);
        request.project_credentials = project.map(|p| p.credentials());
        request.read_only = key.read_only;
        // Project credentials are read-write; read-only pools always use the read-only role
        request.use_environment_defaults = key.read_only;

        let generated = self
            .resolver
            .generate_connection_string_with_fallback(request)
            .await
            .map_err(|e| credentials_error(e.to_string()))?;

        let pool = self
            .factory
            .create_pool(&generated.connection_string, &self.limits)
            .await?;

        info!(
            database = %key.database_name,
            read_only = key.read_only,
            used_fallback = generated.used_fallback,
            max_size = self.limits.max_size,
            "Connection pool created"
        );

        Ok(PoolEntry {
            pool,
            limits: self.limits.clone(),
            created_at: Utc::now(),
            closed: AtomicBool::new(false),
        })
    }
}

// =============================================================================
// DEADPOOL FACTORY
// =============================================================================

/// Production factory backed by deadpool-postgres
#[derive(Debug, Default)]
pub struct DeadpoolFactory;

#[async_trait]
impl PoolFactory for DeadpoolFactory {
    type Pool = Pool;

    async fn create_pool(&self, connection_string: &str, limits: &PoolConfig) -> Result<Pool, PoolError> {
        let target = parse_connection_string(connection_string, ParseOptions::strict())?;
        let pool = create_deadpool(&target, limits)?;

        // Test connection
        match pool.get().await {
            Ok(client) => drop(client),
            Err(e) => {
                pool.close();
                return Err(PoolError::Creation {
                    database: target.database_name,
                    cause: e.to_string(),
                });
            }
        }

        spawn_idle_reaper(pool.clone(), limits.idle_timeout);
        Ok(pool)
    }

    fn stats(&self, pool: &Pool) -> PoolStats {
        let status = pool.status();
        PoolStats {
            total_count: status.size,
            idle_count: status.available,
        }
    }

    fn close(&self, pool: &Pool) {
        pool.close();
    }
}

/// Create a bounded deadpool for a target without connecting yet
pub fn create_deadpool(target: &ConnectionTarget, limits: &PoolConfig) -> Result<Pool, PoolError> {
    let password = target
        .password
        .as_plain()
        .ok_or(ConnectionStringError::MaskedPassword)?;

    let mut cfg = Config::new();
    cfg.host = Some(target.host.clone());
    cfg.port = Some(target.port);
    cfg.user = Some(target.user.clone());
    cfg.password = Some(password.to_string());
    cfg.dbname = Some(target.database_name.clone());
    cfg.connect_timeout = Some(limits.connect_timeout);
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let mut pool_cfg = deadpool_postgres::PoolConfig::new(limits.max_size);
    pool_cfg.timeouts.wait = Some(limits.connect_timeout);
    pool_cfg.timeouts.create = Some(limits.connect_timeout);
    pool_cfg.timeouts.recycle = Some(limits.connect_timeout);
    cfg.pool = Some(pool_cfg);

    let created = if target.ssl_required {
        cfg.create_pool(Some(Runtime::Tokio1), tls_connector())
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
    };

    created.map_err(|e| PoolError::Creation {
        database: target.database_name.clone(),
        cause: e.to_string(),
    })
}

fn tls_connector() -> tokio_postgres_rustls::MakeRustlsConnect {
    let certs = rustls_native_certs::load_native_certs();
    for e in &certs.errors {
        warn!("Failed to load a native certificate: {}", e);
    }

    let mut root_store = rustls::RootCertStore::empty();
    for cert in certs.certs {
        root_store.add(cert).ok();
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    tokio_postgres_rustls::MakeRustlsConnect::new(tls_config)
}

/// Retire connections that sat unused longer than the idle timeout
fn spawn_idle_reaper(pool: Pool, idle_timeout: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(idle_timeout.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if pool.is_closed() {
                break;
            }
            let result = pool.retain(|_, metrics| metrics.last_used() < idle_timeout);
            if !result.removed.is_empty() {
                debug!("Recycled {} idle connection(s)", result.removed.len());
            }
        }
    });
}
