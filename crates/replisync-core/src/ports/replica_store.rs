//! Replica store port (driven/secondary port)
//!
//! The operations the reconciler invokes against the local replica. Each
//! call receives a whole action group as one list so the adapter can write
//! it in a single logical unit.
//!
//! ## Design Notes
//!
//! - Every call carries an [`ApplyUnit`]. The adapter opens, commits or
//!   rolls back its own transaction for that unit; the reconciler never holds
//!   a transaction handle and never spans one across groups.
//! - Every operation is idempotent. Re-applying a create, update or delete
//!   for a key already in the target state succeeds without change, because
//!   batches are redelivered after partial failure.
//! - Uses `anyhow::Result` because storage errors are adapter-specific.

use crate::domain::{ActionGroup, BatchId, ContainerId, DeleteTarget, EntityVO, StreamId};

/// Unit-of-work scope handed to each apply call
///
/// Identifies which batch and which action group the call belongs to. The
/// adapter must apply the whole call atomically: either every item of the
/// unit is written or none is.
#[derive(Debug, Clone, Copy)]
pub struct ApplyUnit<'a> {
    /// Stream the batch was fetched from
    pub stream_id: &'a StreamId,
    /// Correlation id of the batch
    pub batch_id: BatchId,
    /// Action group this call applies
    pub group: ActionGroup,
}

impl<'a> ApplyUnit<'a> {
    pub fn new(stream_id: &'a StreamId, batch_id: BatchId, group: ActionGroup) -> Self {
        Self {
            stream_id,
            batch_id,
            group,
        }
    }
}

/// Port trait for applying reconciled changes to the local replica
#[async_trait::async_trait]
pub trait IReplicaStore: Send + Sync {
    /// Materializes new entities (upsert by key)
    async fn create_many(&self, unit: ApplyUnit<'_>, entities: &[EntityVO]) -> anyhow::Result<()>;

    /// Replaces entities including their content fields (upsert by key)
    async fn update_content_many(
        &self,
        unit: ApplyUnit<'_>,
        entities: &[EntityVO],
    ) -> anyhow::Result<()>;

    /// Updates metadata fields of existing entities
    ///
    /// An entity that is not present locally is skipped.
    async fn update_metadata_many(
        &self,
        unit: ApplyUnit<'_>,
        entities: &[EntityVO],
    ) -> anyhow::Result<()>;

    /// Removes entities and their secondary resources
    ///
    /// A key that is not present locally is skipped.
    async fn delete_many(&self, unit: ApplyUnit<'_>, targets: &[DeleteTarget])
        -> anyhow::Result<()>;

    /// Invalidates every entity of a container so it can be rehydrated
    async fn reset_subtree(
        &self,
        unit: ApplyUnit<'_>,
        container_id: &ContainerId,
    ) -> anyhow::Result<()>;
}

/// Port trait for looking up the primary container of a stream
///
/// Used only as a fallback when a delete entry names no container.
#[async_trait::async_trait]
pub trait IContainerDirectory: Send + Sync {
    /// Returns the default container for the stream
    ///
    /// # Errors
    /// Fails when the lookup itself fails or the stream has no default
    /// container registered.
    async fn lookup_default_container(&self, stream_id: &StreamId)
        -> anyhow::Result<ContainerId>;
}
