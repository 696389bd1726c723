//! SQL query constants and builders
//!
//! Contains the catalog queries used by the initialization sequence and the
//! project registry lookups.

/// Check whether a database exists
pub const DATABASE_EXISTS: &str = r#"
    SELECT EXISTS(
        SELECT 1 FROM pg_database WHERE datname = $1
    ) AS present
"#;

/// Check whether a table exists in a schema
pub const TABLE_EXISTS: &str = r#"
    SELECT EXISTS(
        SELECT 1
        FROM information_schema.tables
        WHERE table_schema = $1
            AND table_name = $2
    ) AS present
"#;

/// Liveness probe
pub const PING: &str = "SELECT 1";

/// Project registry table in the main database's `public` schema.
/// `migrations/projects.sql` creates it under this name.
pub const REGISTRY_TABLE: &str = "projects";

/// SQL builder for safe identifier quoting
pub struct SqlBuilder;

impl SqlBuilder {
    /// Quote an identifier (database/schema/table name) safely
    pub fn quote_ident(ident: &str) -> String {
        // PostgreSQL identifier quoting
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Build CREATE DATABASE query
    pub fn create_database(name: &str) -> String {
        format!("CREATE DATABASE {}", Self::quote_ident(name))
    }

    /// Build DROP DATABASE query, disconnecting any remaining sessions
    pub fn drop_database(name: &str) -> String {
        format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", Self::quote_ident(name))
    }

    /// Analytics schema and its log table
    pub fn system_schema(schema: &str) -> String {
        let schema = Self::quote_ident(schema);
        format!(
            "CREATE SCHEMA IF NOT EXISTS {schema};
             CREATE TABLE IF NOT EXISTS {schema}.\"logs\" (
                id BIGSERIAL PRIMARY KEY,
                project_ref TEXT,
                level TEXT NOT NULL DEFAULT 'info',
                event_message TEXT NOT NULL,
                metadata JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             );
             CREATE INDEX IF NOT EXISTS \"logs_project_ref_created_at_idx\"
                ON {schema}.\"logs\" (project_ref, created_at DESC);"
        )
    }

    /// Registry lookup by an indexed column
    pub fn select_project(column: &str) -> String {
        format!(
            "SELECT ref, database_name, database_user, database_password_hash
             FROM public.{} WHERE {} = $1 LIMIT 1",
            Self::quote_ident(REGISTRY_TABLE),
            Self::quote_ident(column)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(SqlBuilder::quote_ident("plain"), "\"plain\"");
        assert_eq!(SqlBuilder::quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_database_statements() {
        assert_eq!(SqlBuilder::create_database("_supabase"), "CREATE DATABASE \"_supabase\"");
        assert_eq!(
            SqlBuilder::drop_database("supabase_template"),
            "DROP DATABASE IF EXISTS \"supabase_template\" WITH (FORCE)"
        );
    }

    #[test]
    fn test_system_schema_is_idempotent_sql() {
        let sql = SqlBuilder::system_schema("_analytics");
        assert!(sql.contains("CREATE SCHEMA IF NOT EXISTS \"_analytics\""));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS \"_analytics\".\"logs\""));
        assert!(!sql.contains("CREATE TABLE \""));
    }

    #[test]
    fn test_select_project() {
        assert_eq!(
            SqlBuilder::select_project("ref"),
            "SELECT ref, database_name, database_user, database_password_hash
             FROM public.\"projects\" WHERE \"ref\" = $1 LIMIT 1"
        );
    }

    #[test]
    fn test_registry_script_creates_the_queried_table() {
        let script = include_str!("../../migrations/projects.sql");
        let created = format!("CREATE TABLE IF NOT EXISTS public.{} (", REGISTRY_TABLE);
        assert!(script.contains(&created));

        for column in ["ref", "database_name", "database_user", "database_password_hash"] {
            assert!(script.contains(&format!("\n    {} TEXT", column)), "missing column {}", column);
        }
        assert!(SqlBuilder::select_project("database_name").contains("FROM public.\"projects\""));
    }
}
