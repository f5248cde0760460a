//! Replisync Cache - Local replica persistence
//!
//! SQLite-based storage for:
//! - Replicated entity metadata
//! - Stale secondary resources (thumbnails, photo links)
//! - Stream containers and their default container
//! - Per-stream cursors
//!
//! ## Architecture
//!
//! This crate implements the `IReplicaStore`, `IContainerDirectory` and
//! `ICursorStore` ports from `replisync-core` using SQLite as the storage
//! backend. It is a driven (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteReplicaStore`] - Implementation of every replica-side port
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use replisync_cache::{DatabasePool, SqliteReplicaStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/replisync/replica.db")).await?;
//! let store = SqliteReplicaStore::new(pool.pool().clone());
//! // Use store as IReplicaStore / ICursorStore...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod store;

pub use pool::DatabasePool;
pub use store::{ContainerRecord, CursorRecord, SqliteReplicaStore, StoredEntity};

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be turned back into a domain type
    #[error("Invalid stored value: {0}")]
    InvalidRow(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<replisync_core::domain::DomainError> for CacheError {
    fn from(e: replisync_core::domain::DomainError) -> Self {
        CacheError::InvalidRow(e.to_string())
    }
}
