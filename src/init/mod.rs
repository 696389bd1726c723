//! Database Initialization
//!
//! Runs once at startup, before the server accepts requests. Each step checks
//! the catalog for its target and only acts when the target is missing, so a
//! second start against the same server changes nothing.
//!
//! Steps, strictly in order:
//! 1. System database
//! 2. Analytics schema and log table inside the system database
//! 3. Template database (full schema set on creation, migrations otherwise)
//! 4. Project registry table in the main database

pub mod catalog;
pub mod scripts;

pub use catalog::{Catalog, CatalogError, PgCatalog};
pub use scripts::SchemaScripts;

use crate::config::InitConfig;
use crate::db::queries::{SqlBuilder, REGISTRY_TABLE};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitStep {
    SystemDatabase,
    SystemSchemas,
    TemplateDatabase,
    TemplateSchemasOrMigration,
    BookkeepingTable,
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitStep::SystemDatabase => "system-database",
            InitStep::SystemSchemas => "system-schemas",
            InitStep::TemplateDatabase => "template-database",
            InitStep::TemplateSchemasOrMigration => "template-schemas",
            InitStep::BookkeepingTable => "bookkeeping-table",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "action", content = "detail")]
pub enum StepAction {
    Created,
    AlreadyPresent,
    /// Idempotent DDL applied
    Ensured,
    Migrated,
    /// Non-fatal; the existing template is kept as is
    MigrationFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: InitStep,
    pub action: StepAction,
}

/// What one run did, step by step
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitReport {
    pub outcomes: Vec<StepOutcome>,
}

impl InitReport {
    pub fn action(&self, step: InitStep) -> Option<&StepAction> {
        self.outcomes
            .iter()
            .find(|o| o.step == step)
            .map(|o| &o.action)
    }

    fn record(&mut self, step: InitStep, action: StepAction) {
        info!(step = %step, action = ?action, "Initialization step complete");
        self.outcomes.push(StepOutcome { step, action });
    }
}

#[derive(Error, Debug)]
pub enum InitError {
    #[error("Database not reachable after {attempts} attempt(s): {cause}")]
    Unreachable {
        attempts: u32,
        #[source]
        cause: CatalogError,
    },

    #[error("Initialization step '{step}' failed: {cause}")]
    Step {
        step: InitStep,
        #[source]
        cause: CatalogError,
    },

    #[error("Failed to read schema script {}: {cause}", path.display())]
    Script {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
}

fn at(step: InitStep) -> impl FnOnce(CatalogError) -> InitError {
    move |cause| InitError::Step { step, cause }
}

/// Startup orchestrator over a [`Catalog`]
pub struct DatabaseInitializer<C: Catalog> {
    catalog: C,
    config: InitConfig,
    main_database: String,
    scripts: SchemaScripts,
}

impl<C: Catalog> DatabaseInitializer<C> {
    pub fn new(catalog: C, config: InitConfig, main_database: impl Into<String>, scripts: SchemaScripts) -> Self {
        Self {
            catalog,
            config,
            main_database: main_database.into(),
            scripts,
        }
    }

    /// Run every step in order, stopping at the first fatal failure
    pub async fn run(&self) -> Result<InitReport, InitError> {
        self.wait_for_database().await?;

        let mut report = InitReport::default();
        self.ensure_system_database(&mut report).await?;
        self.ensure_system_schemas(&mut report).await?;
        self.ensure_template_database(&mut report).await?;
        self.ensure_bookkeeping_table(&mut report).await?;

        info!("✅ Database initialization complete");
        Ok(report)
    }

    async fn wait_for_database(&self) -> Result<(), InitError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.catalog.ping().await {
                Ok(()) => return Ok(()),
                Err(cause) if attempt >= attempts => {
                    return Err(InitError::Unreachable { attempts, cause });
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Database not ready, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn ensure_system_database(&self, report: &mut InitReport) -> Result<(), InitError> {
        let step = InitStep::SystemDatabase;
        let action = self.ensure_database(&self.config.system_database, step).await?;
        report.record(step, action);
        Ok(())
    }

    async fn ensure_system_schemas(&self, report: &mut InitReport) -> Result<(), InitError> {
        let step = InitStep::SystemSchemas;
        let sql = SqlBuilder::system_schema(&self.config.analytics_schema);
        self.catalog
            .execute_script(&self.config.system_database, &sql)
            .await
            .map_err(at(step))?;
        report.record(step, StepAction::Ensured);
        Ok(())
    }

    async fn ensure_template_database(&self, report: &mut InitReport) -> Result<(), InitError> {
        let template = &self.config.template_database;
        let action = self.ensure_database(template, InitStep::TemplateDatabase).await?;
        let created = action == StepAction::Created;
        report.record(InitStep::TemplateDatabase, action);

        let step = InitStep::TemplateSchemasOrMigration;
        if !created {
            let action = match self.catalog.execute_script(template, &self.scripts.storage_migrations).await {
                Ok(()) => StepAction::Migrated,
                Err(e) => {
                    warn!(database = %template, error = %e, "⚠️  Template migration failed, keeping existing template");
                    StepAction::MigrationFailed(e.to_string())
                }
            };
            report.record(step, action);
            return Ok(());
        }

        for (name, sql) in self.scripts.template_sequence() {
            if let Err(cause) = self.catalog.execute_script(template, sql).await {
                error!(database = %template, script = name, error = %cause, "Template initialization failed");
                // Leave nothing half-built behind for the next start to migrate
                if let Err(e) = self.catalog.drop_database(template).await {
                    error!(database = %template, error = %e, "Failed to drop partially initialized template");
                }
                return Err(InitError::Step { step, cause });
            }
        }
        report.record(step, StepAction::Ensured);
        Ok(())
    }

    async fn ensure_bookkeeping_table(&self, report: &mut InitReport) -> Result<(), InitError> {
        let step = InitStep::BookkeepingTable;
        let present = self
            .catalog
            .table_exists(&self.main_database, "public", REGISTRY_TABLE)
            .await
            .map_err(at(step))?;

        let action = if present {
            StepAction::AlreadyPresent
        } else {
            self.catalog
                .execute_script(&self.main_database, &self.scripts.projects)
                .await
                .map_err(at(step))?;
            StepAction::Created
        };
        report.record(step, action);
        Ok(())
    }

    async fn ensure_database(&self, name: &str, step: InitStep) -> Result<StepAction, InitError> {
        if self.catalog.database_exists(name).await.map_err(at(step))? {
            return Ok(StepAction::AlreadyPresent);
        }
        let created = self.catalog.create_database(name).await.map_err(at(step))?;
        Ok(if created {
            StepAction::Created
        } else {
            StepAction::AlreadyPresent
        })
    }
}
