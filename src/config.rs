//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables,
//! and provides the process environment configuration read by the credential
//! fallback path on every call.

use crate::connection_string::{parse_connection_string, ConnectionTarget, ParseOptions, Password};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
        }
    }
}

/// Administrative database connection, used for bootstrap and project lookups
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub ssl_required: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 10,
            ssl_required: false,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("max_pool_size", &self.max_pool_size)
            .field("ssl_required", &self.ssl_required)
            .finish_non_exhaustive()
    }
}

impl DatabaseConfig {
    /// Connection target for the administrative database
    pub fn target(&self) -> ConnectionTarget {
        let mut target = ConnectionTarget::new(
            self.host.clone(),
            self.port,
            self.user.clone(),
            Password::plain(self.password.clone()),
            self.database.clone(),
        );
        target.ssl_required = self.ssl_required;
        target
    }
}

/// Limits applied to every routed pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_size: usize,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Names and script locations used by the startup initialization sequence
#[derive(Debug, Clone)]
pub struct InitConfig {
    pub system_database: String,
    pub analytics_schema: String,
    pub template_database: String,
    pub scripts_dir: PathBuf,
    pub connect_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            system_database: "_supabase".to_string(),
            analytics_schema: "_analytics".to_string(),
            template_database: "supabase_template".to_string(),
            scripts_dir: PathBuf::from("migrations"),
            connect_attempts: 10,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:8082".to_string()],
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pool: PoolConfig,
    pub init: InitConfig,
    pub cors: CorsConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: env_or("HOST", ServerConfig::default().host),
            port: env_or("PORT", ServerConfig::default().port),
        };

        // DATABASE_URL wins over the individual POSTGRES_* variables
        let database = if let Ok(database_url) = std::env::var("DATABASE_URL") {
            Self::parse_database_url(&database_url)?
        } else {
            let defaults = DatabaseConfig::default();
            DatabaseConfig {
                host: std::env::var("POSTGRES_HOST").unwrap_or(defaults.host),
                port: env_or("POSTGRES_PORT", defaults.port),
                user: std::env::var("POSTGRES_USER_READ_WRITE").unwrap_or(defaults.user),
                password: std::env::var("POSTGRES_PASSWORD").unwrap_or_default(),
                database: std::env::var("POSTGRES_DB").unwrap_or(defaults.database),
                max_pool_size: env_or("DB_MAX_CONNECTIONS", defaults.max_pool_size),
                ssl_required: std::env::var("POSTGRES_SSLMODE")
                    .map(|mode| ssl_mode_requires_tls(&mode))
                    .unwrap_or(false),
            }
        };

        let pool_defaults = PoolConfig::default();
        let pool = PoolConfig {
            max_size: env_or("POOL_MAX_SIZE", pool_defaults.max_size),
            idle_timeout: Duration::from_secs(env_or(
                "POOL_IDLE_TIMEOUT_SECS",
                pool_defaults.idle_timeout.as_secs(),
            )),
            connect_timeout: Duration::from_secs(env_or(
                "POOL_CONNECT_TIMEOUT_SECS",
                pool_defaults.connect_timeout.as_secs(),
            )),
        };
        if pool.max_size == 0 {
            return Err(ConfigError::InvalidValue("POOL_MAX_SIZE must be at least 1".to_string()));
        }

        let init_defaults = InitConfig::default();
        let init = InitConfig {
            system_database: std::env::var("SYSTEM_DATABASE").unwrap_or(init_defaults.system_database),
            analytics_schema: std::env::var("ANALYTICS_SCHEMA").unwrap_or(init_defaults.analytics_schema),
            template_database: std::env::var("TEMPLATE_DATABASE").unwrap_or(init_defaults.template_database),
            scripts_dir: std::env::var("SCHEMA_SCRIPTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(init_defaults.scripts_dir),
            connect_attempts: env_or("DB_CONNECT_ATTEMPTS", init_defaults.connect_attempts).max(1),
            retry_delay: Duration::from_millis(env_or(
                "DB_CONNECT_RETRY_MS",
                init_defaults.retry_delay.as_millis() as u64,
            )),
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        Ok(Self {
            server,
            database,
            pool,
            init,
            cors,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let target = parse_connection_string(url, ParseOptions::strict())
            .map_err(|e| ConfigError::InvalidValue(format!("Invalid DATABASE_URL: {}", e)))?;

        Ok(DatabaseConfig {
            host: target.host,
            port: target.port,
            user: target.user,
            password: target.password.as_plain().unwrap_or_default().to_string(),
            database: target.database_name,
            max_pool_size: env_or("DB_MAX_CONNECTIONS", DatabaseConfig::default().max_pool_size),
            ssl_required: target.ssl_required,
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn ssl_mode_requires_tls(mode: &str) -> bool {
    matches!(mode.trim(), "require" | "verify-ca" | "verify-full")
}

// =============================================================================
// ENVIRONMENT CONFIGURATION PROVIDER
// =============================================================================

/// Process-wide database settings injected by the deployment
#[derive(Clone, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,
    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,
    pub postgres_password: String,
    #[serde(default = "default_read_write_user")]
    pub postgres_user_read_write: String,
    #[serde(default = "default_read_only_user")]
    pub postgres_user_read_only: String,
    #[serde(default)]
    pub postgres_sslmode: Option<String>,
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_read_write_user() -> String {
    "supabase_admin".to_string()
}

fn default_read_only_user() -> String {
    "supabase_read_only_user".to_string()
}

impl EnvironmentConfig {
    pub fn ssl_required(&self) -> bool {
        self.postgres_sslmode
            .as_deref()
            .map(ssl_mode_requires_tls)
            .unwrap_or(false)
    }
}

impl fmt::Debug for EnvironmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentConfig")
            .field("postgres_host", &self.postgres_host)
            .field("postgres_port", &self.postgres_port)
            .field("postgres_user_read_write", &self.postgres_user_read_write)
            .field("postgres_user_read_only", &self.postgres_user_read_only)
            .field("postgres_sslmode", &self.postgres_sslmode)
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug)]
pub enum EnvConfigError {
    #[error("Failed to read environment configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Environment configuration unavailable: {0}")]
    Unavailable(String),
}

/// Source of [`EnvironmentConfig`]; may fail, callers fall back to defaults
#[async_trait]
pub trait EnvironmentConfigProvider: Send + Sync {
    async fn current_config(&self) -> Result<EnvironmentConfig, EnvConfigError>;
}

/// Reads `POSTGRES_*` variables from the process environment on every call
#[derive(Debug, Default)]
pub struct EnvConfigProvider {
    source: Option<config::Map<String, String>>,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from a fixed variable map instead of the process environment
    #[cfg(test)]
    pub fn with_source(source: config::Map<String, String>) -> Self {
        Self {
            source: Some(source),
        }
    }
}

#[async_trait]
impl EnvironmentConfigProvider for EnvConfigProvider {
    async fn current_config(&self) -> Result<EnvironmentConfig, EnvConfigError> {
        let environment = config::Environment::default().source(self.source.clone());
        let config = config::Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize::<EnvironmentConfig>()?;
        Ok(config)
    }
}
