//! Replica database connection pool
//!
//! Opening a [`DatabasePool`] always leaves the schema current: every entry of
//! [`MIGRATIONS`] that is not yet recorded in `schema_migrations` is applied in
//! order. The migration scripts themselves are idempotent, so a database
//! created before tracking existed is brought up to date safely.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::CacheError;

/// Ordered schema scripts, keyed by the version recorded once applied
const MIGRATIONS: &[(&str, &str)] = &[(
    "20261001_initial",
    include_str!("migrations/20261001_initial.sql"),
)];

/// Connections kept for a file-backed replica
const FILE_POOL_SIZE: u32 = 5;

/// Wait applied when several streams write at once
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool of SQLite connections to the replica database
///
/// File-backed pools run in WAL mode so `status` readers never block apply
/// calls. The in-memory pool holds a single connection, since every SQLite
/// memory connection is its own database.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (creating if needed) the replica database at `db_path`
    ///
    /// # Errors
    ///
    /// `CacheError::ConnectionFailed` when the directory or database cannot be
    /// opened, `CacheError::MigrationFailed` when the schema cannot be applied.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!("{}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = Self::connect(options, FILE_POOL_SIZE, &db_path.display().to_string()).await?;
        tracing::info!(path = %db_path.display(), "Replica database opened");
        Ok(pool)
    }

    /// Creates an empty in-memory replica, used by tests
    ///
    /// # Errors
    ///
    /// Same as [`DatabasePool::new`].
    pub async fn in_memory() -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| CacheError::ConnectionFailed(format!("in-memory replica: {e}")))?;
        Self::connect(options, 1, "in-memory replica").await
    }

    async fn connect(
        options: SqliteConnectOptions,
        max_connections: u32,
        label: &str,
    ) -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::ConnectionFailed(format!("{label}: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// The underlying sqlx pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Versions recorded in `schema_migrations`, oldest first
    pub async fn applied_migrations(&self) -> Result<Vec<String>, CacheError> {
        let versions: Vec<String> =
            sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
                .fetch_all(&self.pool)
                .await?;
        Ok(versions)
    }

    async fn migrate(&self) -> Result<(), CacheError> {
        let failed = |version: &str, e: sqlx::Error| {
            CacheError::MigrationFailed(format!("{version}: {e}"))
        };

        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| failed("schema_migrations", e))?;

        let applied = self.applied_migrations().await?;
        for &(version, script) in MIGRATIONS {
            if applied.iter().any(|v| v == version) {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(script)
                .execute(&mut *tx)
                .await
                .map_err(|e| failed(version, e))?;
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(|e| failed(version, e))?;
            tx.commit().await?;

            tracing::debug!(version, "Applied replica migration");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pool_has_schema() {
        let pool = DatabasePool::in_memory().await.unwrap();
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(pool.pool())
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec![
                "containers",
                "entities",
                "schema_migrations",
                "secondary_links",
                "stream_cursors"
            ]
        );
    }

    #[tokio::test]
    async fn test_file_pool_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("replica.db");
        let _pool = DatabasePool::new(&path).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_reopen_does_not_reapply_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.db");
        drop(DatabasePool::new(&path).await.unwrap());

        let pool = DatabasePool::new(&path).await.unwrap();

        assert_eq!(
            pool.applied_migrations().await.unwrap(),
            vec!["20261001_initial".to_string()]
        );
    }
}
