// Project registry lookups
//
// Read-only access to the project bookkeeping table. Rows are converted to
// strict credential types here so nothing loosely typed reaches the codec or
// the pool router.

use crate::credentials::{get_project_credentials, ProjectCredentials};
use crate::db::queries::SqlBuilder;
use crate::error::AppError;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;

// Project record from the registry table
#[derive(Clone, Debug)]
pub struct ProjectRecord {
    pub project_ref: String,
    pub database_name: String,
    pub database_user: Option<String>,
    pub database_password_hash: Option<String>,
}

impl ProjectRecord {
    pub fn credentials(&self) -> ProjectCredentials {
        get_project_credentials(
            &self.project_ref,
            self.database_user.as_deref(),
            self.database_password_hash.as_deref(),
        )
    }
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn find_by_ref(&self, project_ref: &str) -> Result<Option<ProjectRecord>, AppError>;

    async fn find_by_database_name(&self, database_name: &str) -> Result<Option<ProjectRecord>, AppError>;
}

// Registry backed by the admin database pool
pub struct PgProjectStore {
    pool: Pool,
    by_ref: String,
    by_database: String,
}

impl PgProjectStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            by_ref: SqlBuilder::select_project("ref"),
            by_database: SqlBuilder::select_project("database_name"),
        }
    }

    async fn find_one(&self, sql: &str, value: &str) -> Result<Option<ProjectRecord>, AppError> {
        let client = self.pool.get().await
            .map_err(|e| AppError::Internal(format!("Database pool error: {}", e)))?;

        let row = client.query_opt(sql, &[&value])
            .await
            .map_err(|e| AppError::Internal(format!("Database error: {}", e)))?;

        Ok(row.map(|r| record_from_row(&r)))
    }
}

fn record_from_row(r: &Row) -> ProjectRecord {
    ProjectRecord {
        project_ref: r.get(0),
        database_name: r.get(1),
        database_user: r.get(2),
        database_password_hash: r.get(3),
    }
}

#[async_trait]
impl ProjectStore for PgProjectStore {
    async fn find_by_ref(&self, project_ref: &str) -> Result<Option<ProjectRecord>, AppError> {
        self.find_one(&self.by_ref, project_ref).await
    }

    async fn find_by_database_name(&self, database_name: &str) -> Result<Option<ProjectRecord>, AppError> {
        self.find_one(&self.by_database, database_name).await
    }
}
