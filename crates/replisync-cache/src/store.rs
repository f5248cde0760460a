//! SQLite implementation of the replica-side ports
//!
//! [`SqliteReplicaStore`] implements [`IReplicaStore`], [`IContainerDirectory`]
//! and [`ICursorStore`].
//!
//! ## Units of work
//!
//! Every apply call opens its own transaction, writes the whole list and
//! commits. A failure anywhere in the list rolls the transaction back (the
//! transaction is dropped without commit) so a call is all-or-nothing.
//!
//! ## Idempotence
//!
//! | Call                    | Statement                                  | Missing row |
//! |-------------------------|--------------------------------------------|-------------|
//! | `create_many`           | `INSERT ... ON CONFLICT DO UPDATE`         | inserted    |
//! | `update_content_many`   | `INSERT ... ON CONFLICT DO UPDATE`         | inserted    |
//! | `update_metadata_many`  | `UPDATE` of name/parent/state/modified_at  | skipped     |
//! | `delete_many`           | `DELETE`                                   | skipped     |
//! | `reset_subtree`         | `DELETE` of the container + stamp          | stamped     |
//!
//! ## Type Mapping
//!
//! | Domain Type     | SQL Type | Strategy                                   |
//! |-----------------|----------|--------------------------------------------|
//! | ids, cursors    | TEXT     | `.as_str()` / `::new()`                    |
//! | EntityKind      | TEXT     | `as_str()` (`file`, `folder`)              |
//! | LinkState       | TEXT     | `as_str()` (`active`, `trashed`)           |
//! | DateTime<Utc>   | TEXT     | RFC 3339 via `to_rfc3339()`                |
//! | u64 size        | INTEGER  | cast to `i64`                              |

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use replisync_core::domain::{
    ContainerId, CursorToken, DeleteTarget, EntityKey, EntityKind, EntityVO, LinkRecord,
    LinkState, LocalId, StreamId,
};
use replisync_core::ports::{ApplyUnit, IContainerDirectory, ICursorStore, IReplicaStore};

use crate::CacheError;

/// An entity as persisted in the replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEntity {
    pub key: EntityKey,
    pub link: LinkRecord,
    /// Stream whose batch last wrote the row
    pub stream_id: StreamId,
    /// When the row was last written
    pub updated_at: DateTime<Utc>,
}

/// A container registered for a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerRecord {
    pub stream_id: StreamId,
    pub container_id: ContainerId,
    pub is_default: bool,
    /// Set by a reset and cleared once the stream writes into it again
    pub invalidated_at: Option<DateTime<Utc>>,
}

/// A persisted stream cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CursorRecord {
    pub stream_id: StreamId,
    pub cursor: CursorToken,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-based implementation of the replica ports
pub struct SqliteReplicaStore {
    pool: SqlitePool,
}

impl SqliteReplicaStore {
    /// Creates a new store with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn entity_kind_from_str(s: &str) -> Result<EntityKind, CacheError> {
    match s {
        "file" => Ok(EntityKind::File),
        "folder" => Ok(EntityKind::Folder),
        other => Err(CacheError::InvalidRow(format!("Unknown entity kind: {other}"))),
    }
}

fn link_state_from_str(s: &str) -> Result<LinkState, CacheError> {
    match s {
        "active" => Ok(LinkState::Active),
        "trashed" => Ok(LinkState::Trashed),
        other => Err(CacheError::InvalidRow(format!("Unknown link state: {other}"))),
    }
}

/// Parse a DateTime<Utc> from an RFC 3339 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CacheError::InvalidRow(format!("Failed to parse datetime '{s}': {e}")))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn entity_from_row(row: &SqliteRow) -> Result<StoredEntity, CacheError> {
    let container_id: String = row.try_get("container_id")?;
    let local_id: String = row.try_get("local_id")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    let kind: String = row.try_get("kind")?;
    let size: i64 = row.try_get("size")?;
    let modified_at: String = row.try_get("modified_at")?;
    let state: String = row.try_get("state")?;
    let stream_id: String = row.try_get("stream_id")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(StoredEntity {
        key: EntityKey::new(ContainerId::new(container_id)?, LocalId::new(local_id)?),
        link: LinkRecord {
            parent_id: parent_id.map(LocalId::new).transpose()?,
            name: row.try_get("name")?,
            kind: entity_kind_from_str(&kind)?,
            size: u64::try_from(size)
                .map_err(|_| CacheError::InvalidRow(format!("Negative size: {size}")))?,
            mime_type: row.try_get("mime_type")?,
            modified_at: parse_datetime(&modified_at)?,
            revision_id: row.try_get("revision_id")?,
            state: link_state_from_str(&state)?,
        },
        stream_id: StreamId::new(stream_id)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn container_from_row(row: &SqliteRow) -> Result<ContainerRecord, CacheError> {
    let stream_id: String = row.try_get("stream_id")?;
    let container_id: String = row.try_get("container_id")?;
    let is_default: bool = row.try_get("is_default")?;
    let invalidated_at: Option<String> = row.try_get("invalidated_at")?;

    Ok(ContainerRecord {
        stream_id: StreamId::new(stream_id)?,
        container_id: ContainerId::new(container_id)?,
        is_default,
        invalidated_at: parse_optional_datetime(invalidated_at)?,
    })
}

fn cursor_from_row(row: &SqliteRow) -> Result<CursorRecord, CacheError> {
    let stream_id: String = row.try_get("stream_id")?;
    let cursor: String = row.try_get("cursor")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(CursorRecord {
        stream_id: StreamId::new(stream_id)?,
        cursor: CursorToken::new(cursor)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

// ============================================================================
// Statements shared by several apply calls
// ============================================================================

/// Inserts or fully replaces an entity row
async fn upsert_entity(
    tx: &mut Transaction<'_, Sqlite>,
    unit: ApplyUnit<'_>,
    entity: &EntityVO,
    now: &str,
) -> Result<(), CacheError> {
    let link = &entity.link;
    sqlx::query(
        "INSERT INTO entities \
         (container_id, local_id, parent_id, name, kind, size, mime_type, \
          modified_at, revision_id, state, stream_id, last_batch_id, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (container_id, local_id) DO UPDATE SET \
          parent_id = excluded.parent_id, \
          name = excluded.name, \
          kind = excluded.kind, \
          size = excluded.size, \
          mime_type = excluded.mime_type, \
          modified_at = excluded.modified_at, \
          revision_id = excluded.revision_id, \
          state = excluded.state, \
          stream_id = excluded.stream_id, \
          last_batch_id = excluded.last_batch_id, \
          updated_at = excluded.updated_at",
    )
    .bind(entity.key.container_id().as_str())
    .bind(entity.key.local_id().as_str())
    .bind(link.parent_id.as_ref().map(LocalId::as_str))
    .bind(&link.name)
    .bind(link.kind.as_str())
    .bind(i64::try_from(link.size).unwrap_or(i64::MAX))
    .bind(&link.mime_type)
    .bind(link.modified_at.to_rfc3339())
    .bind(&link.revision_id)
    .bind(link.state.as_str())
    .bind(unit.stream_id.as_str())
    .bind(unit.batch_id.to_string())
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Records the secondary resources a change invalidated
async fn mark_secondary_stale(
    tx: &mut Transaction<'_, Sqlite>,
    key: &EntityKey,
    secondary_ids: &[String],
    now: &str,
) -> Result<(), CacheError> {
    for secondary_id in secondary_ids {
        sqlx::query(
            "INSERT INTO secondary_links (container_id, local_id, secondary_id, invalidated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (container_id, secondary_id) DO UPDATE SET \
              local_id = excluded.local_id, invalidated_at = excluded.invalidated_at",
        )
        .bind(key.container_id().as_str())
        .bind(key.local_id().as_str())
        .bind(secondary_id)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Clears the reset mark of a container once content lands in it again
async fn mark_rehydrated(
    tx: &mut Transaction<'_, Sqlite>,
    stream_id: &StreamId,
    container_id: &ContainerId,
) -> Result<(), CacheError> {
    sqlx::query(
        "UPDATE containers SET invalidated_at = NULL \
         WHERE stream_id = ? AND container_id = ? AND invalidated_at IS NOT NULL",
    )
    .bind(stream_id.as_str())
    .bind(container_id.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl SqliteReplicaStore {
    async fn upsert_many(&self, unit: ApplyUnit<'_>, entities: &[EntityVO]) -> Result<(), CacheError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for entity in entities {
            upsert_entity(&mut tx, unit, entity, &now).await?;
            mark_secondary_stale(&mut tx, &entity.key, &entity.invalidated_secondary_ids, &now)
                .await?;
        }
        let mut containers: Vec<&ContainerId> =
            entities.iter().map(|e| e.key.container_id()).collect();
        containers.sort();
        containers.dedup();
        for container_id in containers {
            mark_rehydrated(&mut tx, unit.stream_id, container_id).await?;
        }
        tx.commit().await?;

        tracing::debug!(
            stream_id = %unit.stream_id,
            batch_id = %unit.batch_id,
            group = %unit.group,
            count = entities.len(),
            "Upserted entities"
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Read helpers
    // ------------------------------------------------------------------------

    /// Returns the entity stored under `key`
    pub async fn get_entity(&self, key: &EntityKey) -> Result<Option<StoredEntity>, CacheError> {
        let row = sqlx::query("SELECT * FROM entities WHERE container_id = ? AND local_id = ?")
            .bind(key.container_id().as_str())
            .bind(key.local_id().as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entity_from_row).transpose()
    }

    /// Lists the children of `parent` (or the top-level entities) in a container
    pub async fn list_children(
        &self,
        container_id: &ContainerId,
        parent: Option<&LocalId>,
    ) -> Result<Vec<StoredEntity>, CacheError> {
        let rows = sqlx::query(
            "SELECT * FROM entities WHERE container_id = ? AND parent_id IS ? ORDER BY name",
        )
        .bind(container_id.as_str())
        .bind(parent.map(LocalId::as_str))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entity_from_row).collect()
    }

    /// Number of entities stored for a container
    pub async fn count_entities(&self, container_id: &ContainerId) -> Result<u64, CacheError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE container_id = ?")
            .bind(container_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Number of entities last written by a stream
    pub async fn count_stream_entities(&self, stream_id: &StreamId) -> Result<u64, CacheError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE stream_id = ?")
            .bind(stream_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Secondary resources of an entity that must be refetched
    pub async fn stale_secondary_ids(&self, key: &EntityKey) -> Result<Vec<String>, CacheError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT secondary_id FROM secondary_links \
             WHERE container_id = ? AND local_id = ? ORDER BY secondary_id",
        )
        .bind(key.container_id().as_str())
        .bind(key.local_id().as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Registers a container for a stream
    ///
    /// With `is_default`, the container becomes the one deletes without
    /// context resolve to; any previous default of the stream is demoted.
    pub async fn register_container(
        &self,
        stream_id: &StreamId,
        container_id: &ContainerId,
        is_default: bool,
    ) -> Result<(), CacheError> {
        let mut tx = self.pool.begin().await?;
        if is_default {
            sqlx::query("UPDATE containers SET is_default = 0 WHERE stream_id = ? AND container_id != ?")
                .bind(stream_id.as_str())
                .bind(container_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "INSERT INTO containers (stream_id, container_id, is_default, registered_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (stream_id, container_id) DO UPDATE SET is_default = excluded.is_default",
        )
        .bind(stream_id.as_str())
        .bind(container_id.as_str())
        .bind(is_default)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(
            stream_id = %stream_id,
            container_id = %container_id,
            is_default,
            "Registered container"
        );
        Ok(())
    }

    /// Containers registered for a stream
    pub async fn list_containers(
        &self,
        stream_id: &StreamId,
    ) -> Result<Vec<ContainerRecord>, CacheError> {
        let rows = sqlx::query(
            "SELECT * FROM containers WHERE stream_id = ? ORDER BY is_default DESC, container_id",
        )
        .bind(stream_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(container_from_row).collect()
    }

    /// Every stored cursor, ordered by stream
    pub async fn list_cursors(&self) -> Result<Vec<CursorRecord>, CacheError> {
        let rows = sqlx::query("SELECT * FROM stream_cursors ORDER BY stream_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(cursor_from_row).collect()
    }
}

// ============================================================================
// IReplicaStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IReplicaStore for SqliteReplicaStore {
    async fn create_many(&self, unit: ApplyUnit<'_>, entities: &[EntityVO]) -> anyhow::Result<()> {
        Ok(self.upsert_many(unit, entities).await?)
    }

    async fn update_content_many(
        &self,
        unit: ApplyUnit<'_>,
        entities: &[EntityVO],
    ) -> anyhow::Result<()> {
        Ok(self.upsert_many(unit, entities).await?)
    }

    async fn update_metadata_many(
        &self,
        unit: ApplyUnit<'_>,
        entities: &[EntityVO],
    ) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let mut skipped = 0usize;

        for entity in entities {
            let link = &entity.link;
            let result = sqlx::query(
                "UPDATE entities SET \
                  parent_id = ?, name = ?, state = ?, modified_at = ?, \
                  stream_id = ?, last_batch_id = ?, updated_at = ? \
                 WHERE container_id = ? AND local_id = ?",
            )
            .bind(link.parent_id.as_ref().map(LocalId::as_str))
            .bind(&link.name)
            .bind(link.state.as_str())
            .bind(link.modified_at.to_rfc3339())
            .bind(unit.stream_id.as_str())
            .bind(unit.batch_id.to_string())
            .bind(&now)
            .bind(entity.key.container_id().as_str())
            .bind(entity.key.local_id().as_str())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                skipped += 1;
                tracing::debug!(key = %entity.key, "Metadata update for absent entity skipped");
                continue;
            }
            mark_secondary_stale(&mut tx, &entity.key, &entity.invalidated_secondary_ids, &now)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(
            stream_id = %unit.stream_id,
            batch_id = %unit.batch_id,
            count = entities.len(),
            skipped,
            "Updated entity metadata"
        );
        Ok(())
    }

    async fn delete_many(&self, unit: ApplyUnit<'_>, targets: &[DeleteTarget]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;

        for target in targets {
            let container = target.key.container_id().as_str();
            let local = target.key.local_id().as_str();

            removed += sqlx::query("DELETE FROM entities WHERE container_id = ? AND local_id = ?")
                .bind(container)
                .bind(local)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            sqlx::query("DELETE FROM secondary_links WHERE container_id = ? AND local_id = ?")
                .bind(container)
                .bind(local)
                .execute(&mut *tx)
                .await?;

            for secondary_id in &target.removed_secondary_ids {
                sqlx::query(
                    "DELETE FROM secondary_links WHERE container_id = ? AND secondary_id = ?",
                )
                .bind(container)
                .bind(secondary_id)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        tracing::debug!(
            stream_id = %unit.stream_id,
            batch_id = %unit.batch_id,
            requested = targets.len(),
            removed,
            "Deleted entities"
        );
        Ok(())
    }

    async fn reset_subtree(
        &self,
        unit: ApplyUnit<'_>,
        container_id: &ContainerId,
    ) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        // Secondary links carry no stream, so they go first while the owning
        // entities still identify them.
        sqlx::query(
            "DELETE FROM secondary_links WHERE container_id = ? \
              OR (container_id, local_id) IN \
                 (SELECT container_id, local_id FROM entities WHERE stream_id = ?)",
        )
        .bind(container_id.as_str())
        .bind(unit.stream_id.as_str())
        .execute(&mut *tx)
        .await?;
        let removed = sqlx::query("DELETE FROM entities WHERE container_id = ? OR stream_id = ?")
            .bind(container_id.as_str())
            .bind(unit.stream_id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "INSERT INTO containers (stream_id, container_id, is_default, registered_at, invalidated_at) \
             VALUES (?, ?, 0, ?, ?) \
             ON CONFLICT (stream_id, container_id) DO UPDATE SET invalidated_at = excluded.invalidated_at",
        )
        .bind(unit.stream_id.as_str())
        .bind(container_id.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE containers SET invalidated_at = ? WHERE stream_id = ?")
            .bind(&now)
            .bind(unit.stream_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            stream_id = %unit.stream_id,
            container_id = %container_id,
            removed,
            "Stream subtree invalidated for rehydration"
        );
        Ok(())
    }
}

// ============================================================================
// IContainerDirectory implementation
// ============================================================================

#[async_trait::async_trait]
impl IContainerDirectory for SqliteReplicaStore {
    async fn lookup_default_container(&self, stream_id: &StreamId) -> anyhow::Result<ContainerId> {
        let container: Option<String> = sqlx::query_scalar(
            "SELECT container_id FROM containers WHERE stream_id = ? AND is_default = 1",
        )
        .bind(stream_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let container = container.ok_or_else(|| {
            anyhow::anyhow!("No default container registered for stream {stream_id}")
        })?;
        Ok(ContainerId::new(container)?)
    }
}

// ============================================================================
// ICursorStore implementation
// ============================================================================

#[async_trait::async_trait]
impl ICursorStore for SqliteReplicaStore {
    async fn load_cursor(&self, stream_id: &StreamId) -> anyhow::Result<Option<CursorToken>> {
        let cursor: Option<String> =
            sqlx::query_scalar("SELECT cursor FROM stream_cursors WHERE stream_id = ?")
                .bind(stream_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(cursor.map(CursorToken::new).transpose()?)
    }

    async fn save_cursor(&self, stream_id: &StreamId, cursor: &CursorToken) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO stream_cursors (stream_id, cursor, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT (stream_id) DO UPDATE SET \
              cursor = excluded.cursor, updated_at = excluded.updated_at",
        )
        .bind(stream_id.as_str())
        .bind(cursor.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(stream_id = %stream_id, cursor = %cursor, "Saved cursor");
        Ok(())
    }
}
