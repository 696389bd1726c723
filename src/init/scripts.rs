//! Schema scripts applied during initialization

use super::InitError;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const AUTH_SCRIPT: &str = "auth.sql";
pub const STORAGE_SCRIPT: &str = "storage.sql";
pub const WEBHOOKS_SCRIPT: &str = "webhooks.sql";
pub const ANALYTICS_SCRIPT: &str = "analytics.sql";
pub const STORAGE_MIGRATIONS_SCRIPT: &str = "storage-migrations.sql";
pub const PROJECTS_SCRIPT: &str = "projects.sql";

/// The fixed script set, read once at startup
#[derive(Debug, Clone, Default)]
pub struct SchemaScripts {
    pub auth: String,
    pub storage: String,
    pub webhooks: String,
    pub analytics: String,
    pub storage_migrations: String,
    pub projects: String,
}

impl SchemaScripts {
    /// Read every script from `dir`; a missing file is an error
    pub async fn load(dir: &Path) -> Result<Self, InitError> {
        let scripts = Self {
            auth: read(dir, AUTH_SCRIPT).await?,
            storage: read(dir, STORAGE_SCRIPT).await?,
            webhooks: read(dir, WEBHOOKS_SCRIPT).await?,
            analytics: read(dir, ANALYTICS_SCRIPT).await?,
            storage_migrations: read(dir, STORAGE_MIGRATIONS_SCRIPT).await?,
            projects: read(dir, PROJECTS_SCRIPT).await?,
        };
        debug!(dir = %dir.display(), "Loaded schema scripts");
        Ok(scripts)
    }

    /// Full template initialization, in dependency order
    pub fn template_sequence(&self) -> [(&'static str, &str); 5] {
        [
            (AUTH_SCRIPT, &self.auth),
            (STORAGE_SCRIPT, &self.storage),
            (WEBHOOKS_SCRIPT, &self.webhooks),
            (ANALYTICS_SCRIPT, &self.analytics),
            (STORAGE_MIGRATIONS_SCRIPT, &self.storage_migrations),
        ]
    }
}

async fn read(dir: &Path, name: &str) -> Result<String, InitError> {
    let path: PathBuf = dir.join(name);
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|cause| InitError::Script { path, cause })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("pgroute-{}-{}-{}", tag, std::process::id(), nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const ALL: [&str; 6] = [
        AUTH_SCRIPT,
        STORAGE_SCRIPT,
        WEBHOOKS_SCRIPT,
        ANALYTICS_SCRIPT,
        STORAGE_MIGRATIONS_SCRIPT,
        PROJECTS_SCRIPT,
    ];

    #[tokio::test]
    async fn test_load_reads_every_script() {
        let dir = scratch_dir("load");
        for name in ALL {
            std::fs::write(dir.join(name), format!("-- {}", name)).unwrap();
        }

        let scripts = SchemaScripts::load(&dir).await.unwrap();
        assert_eq!(scripts.projects, "-- projects.sql");

        let order: Vec<&str> = scripts.template_sequence().iter().map(|(name, _)| *name).collect();
        assert_eq!(order, ALL[..5].to_vec());
        assert_eq!(scripts.template_sequence()[4].1, "-- storage-migrations.sql");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_script_names_the_file() {
        let dir = scratch_dir("missing");
        for name in ALL.iter().filter(|n| **n != WEBHOOKS_SCRIPT) {
            std::fs::write(dir.join(name), "").unwrap();
        }

        match SchemaScripts::load(&dir).await {
            Err(InitError::Script { path, .. }) => assert!(path.ends_with(WEBHOOKS_SCRIPT)),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }

        std::fs::remove_dir_all(&dir).ok();
    }
}
