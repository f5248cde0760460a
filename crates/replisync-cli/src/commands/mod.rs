//! CLI subcommands
//!
//! - [`apply`] - Reconcile one batch file
//! - [`replay`] - Run the stream runner over the batch directory
//! - [`status`] - Show cursors and replica counts
//! - [`config`] - Show and validate configuration

pub mod apply;
pub mod config;
pub mod replay;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use replisync_cache::{DatabasePool, SqliteReplicaStore};
use replisync_core::config::Config;
use replisync_core::domain::StreamConfig;
use replisync_sync::{ContextResolver, Reconciler};

/// State shared by every subcommand
pub struct CliContext {
    pub config: Config,
    pub config_path: PathBuf,
    pub format: crate::output::OutputFormat,
}

/// Opens (creating if needed) the replica database named in the configuration
pub(crate) async fn open_store(config: &Config) -> Result<Arc<SqliteReplicaStore>> {
    let pool = DatabasePool::new(&config.store.database)
        .await
        .with_context(|| {
            format!(
                "Failed to open replica database at {}",
                config.store.database.display()
            )
        })?;
    Ok(Arc::new(SqliteReplicaStore::new(pool.pool().clone())))
}

/// Builds a reconciler whose apply ports and container directory are `store`
pub(crate) fn build_reconciler(store: &Arc<SqliteReplicaStore>) -> Reconciler {
    Reconciler::new(store.clone(), ContextResolver::new(store.clone()))
}

/// Registers the container a stream is scoped to as its default container
///
/// Deletes that name no container resolve to it.
pub(crate) async fn register_stream(store: &SqliteReplicaStore, stream: &StreamConfig) -> Result<()> {
    if let Some(container) = stream.kind.reset_target() {
        store
            .register_container(&stream.stream_id, container, true)
            .await
            .with_context(|| format!("Failed to register container of stream {}", stream.stream_id))?;
    }
    Ok(())
}
