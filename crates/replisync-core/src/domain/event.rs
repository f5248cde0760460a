//! Change-feed event model
//!
//! Wire-independent representation of one change-feed entry and of the
//! reconciled actions derived from it.
//!
//! ## Lifecycle
//!
//! ```text
//! batch body ──decode──→ RawEvent ──resolve──→ ReconciledEvent ──group──→ apply ports
//! ```
//!
//! `RawEvent` and `ReconciledEvent` live for one batch. The entity carried by
//! an [`EntityVO`] is persisted by the replica store and outlives the event.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContainerId, CursorToken, EntityKey, LocalId};

// ============================================================================
// Entity attributes
// ============================================================================

/// Whether a replicated entity is a file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    File,
    Folder,
}

impl EntityKind {
    /// Stable lowercase name used by storage adapters
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::File => "file",
            EntityKind::Folder => "folder",
        }
    }
}

/// Server-side lifecycle state of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Active,
    Trashed,
}

impl LinkState {
    /// Stable lowercase name used by storage adapters
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Active => "active",
            LinkState::Trashed => "trashed",
        }
    }
}

/// Materialized attributes of a synced file or folder
///
/// Content fields (`size`, `mime_type`, `revision_id`) are only written by
/// full creates and content updates; metadata-only updates touch the
/// remaining fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Parent folder inside the same container (None for the container root)
    pub parent_id: Option<LocalId>,
    /// Display name (may be encrypted; the engine treats it as opaque)
    pub name: String,
    /// File or folder
    pub kind: EntityKind,
    /// Size in bytes of the active revision
    pub size: u64,
    /// MIME type of the active revision
    pub mime_type: Option<String>,
    /// Server modification time
    pub modified_at: DateTime<Utc>,
    /// Active revision identifier (files only)
    pub revision_id: Option<String>,
    /// Trash state
    pub state: LinkState,
}

// ============================================================================
// Raw events
// ============================================================================

/// Kind tag of a decoded change-feed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    UpdateContent,
    UpdateMetadata,
    Delete,
    Unknown,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Create => "create",
            EventKind::UpdateContent => "update_content",
            EventKind::UpdateMetadata => "update_metadata",
            EventKind::Delete => "delete",
            EventKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Body shared by create, content-update and metadata-update entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityEvent {
    /// Container-local id of the affected entity
    pub local_id: LocalId,
    /// Entity attributes as sent by the server
    pub link: LinkRecord,
    /// Explicit container carried by the entry
    pub context: Option<ContainerId>,
    /// Container embedded in the payload, or stamped by a share-scoped stream
    pub context_hint: Option<ContainerId>,
    /// Secondary resources (thumbnails, photo links) invalidated with this change
    pub invalidated_secondary_ids: Vec<String>,
}

/// Body of a delete entry; deletes carry no entity payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEvent {
    /// Container-local id of the removed entity
    pub local_id: LocalId,
    /// Explicit container carried by the entry
    pub context: Option<ContainerId>,
    /// Container stamped by a share-scoped stream
    pub context_hint: Option<ContainerId>,
    /// Secondary resources removed alongside the entity
    pub removed_secondary_ids: Vec<String>,
}

/// One decoded change-feed entry
///
/// A closed set of variants: every tag the decoder does not recognise ends
/// up as [`RawEvent::Unknown`] and is dropped at classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Create(EntityEvent),
    UpdateContent(EntityEvent),
    UpdateMetadata(EntityEvent),
    Delete(DeleteEvent),
    Unknown {
        /// Discriminator as found on the wire (empty when absent)
        tag: String,
    },
}

impl RawEvent {
    /// The kind tag of this entry
    pub fn kind(&self) -> EventKind {
        match self {
            RawEvent::Create(_) => EventKind::Create,
            RawEvent::UpdateContent(_) => EventKind::UpdateContent,
            RawEvent::UpdateMetadata(_) => EventKind::UpdateMetadata,
            RawEvent::Delete(_) => EventKind::Delete,
            RawEvent::Unknown { .. } => EventKind::Unknown,
        }
    }

    /// Container-local id of the affected entity, if the entry is known
    pub fn local_id(&self) -> Option<&LocalId> {
        match self {
            RawEvent::Create(e) | RawEvent::UpdateContent(e) | RawEvent::UpdateMetadata(e) => {
                Some(&e.local_id)
            }
            RawEvent::Delete(d) => Some(&d.local_id),
            RawEvent::Unknown { .. } => None,
        }
    }
}

/// Result of decoding one batch body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBatch {
    /// Entries in server order, including `Unknown` placeholders
    pub events: Vec<RawEvent>,
    /// Reset directive: discard the stream's subtree and rehydrate
    pub refresh: bool,
    /// Another batch is available right away
    pub more: bool,
    /// Cursor to persist once this batch has been applied
    pub next_cursor: Option<CursorToken>,
}

// ============================================================================
// Reconciled events
// ============================================================================

/// Reconciliation action derived from an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Create,
    Update,
    Partial,
    Delete,
}

/// The apply-port call a unit of work belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionGroup {
    Create,
    UpdateContent,
    UpdateMetadata,
    Delete,
    Reset,
}

impl ActionGroup {
    /// Stable name used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionGroup::Create => "create",
            ActionGroup::UpdateContent => "update_content",
            ActionGroup::UpdateMetadata => "update_metadata",
            ActionGroup::Delete => "delete",
            ActionGroup::Reset => "reset",
        }
    }
}

impl fmt::Display for ActionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Action> for ActionGroup {
    fn from(action: Action) -> Self {
        match action {
            Action::Create => ActionGroup::Create,
            Action::Update => ActionGroup::UpdateContent,
            Action::Partial => ActionGroup::UpdateMetadata,
            Action::Delete => ActionGroup::Delete,
        }
    }
}

/// Materialized entity plus the side-effect data that travels with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityVO {
    pub key: EntityKey,
    pub link: LinkRecord,
    pub invalidated_secondary_ids: Vec<String>,
}

/// Delete request handed to the delete apply port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTarget {
    pub key: EntityKey,
    pub removed_secondary_ids: Vec<String>,
}

/// An event whose context has been resolved
///
/// `entity` is `None` exactly when `action` is [`Action::Delete`]; the
/// constructors are the only way to build one, which keeps that true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledEvent {
    action: Action,
    entity_key: EntityKey,
    entity: Option<EntityVO>,
    removed_secondary_ids: Vec<String>,
}

impl ReconciledEvent {
    /// Builds a create, update or partial event around a materialized entity
    ///
    /// Returns `None` for [`Action::Delete`]; use [`ReconciledEvent::delete`].
    pub fn with_entity(action: Action, entity: EntityVO) -> Option<Self> {
        if action == Action::Delete {
            return None;
        }
        Some(Self::entity_action(action, entity))
    }

    /// Builds a create event
    pub fn create(entity: EntityVO) -> Self {
        Self::entity_action(Action::Create, entity)
    }

    /// Builds a full (content) update event
    pub fn update_content(entity: EntityVO) -> Self {
        Self::entity_action(Action::Update, entity)
    }

    /// Builds a metadata-only update event
    pub fn update_metadata(entity: EntityVO) -> Self {
        Self::entity_action(Action::Partial, entity)
    }

    fn entity_action(action: Action, entity: EntityVO) -> Self {
        Self {
            action,
            entity_key: entity.key.clone(),
            entity: Some(entity),
            removed_secondary_ids: Vec::new(),
        }
    }

    /// Builds a delete event
    pub fn delete(entity_key: EntityKey, removed_secondary_ids: Vec<String>) -> Self {
        Self {
            action: Action::Delete,
            entity_key,
            entity: None,
            removed_secondary_ids,
        }
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn entity_key(&self) -> &EntityKey {
        &self.entity_key
    }

    pub fn entity(&self) -> Option<&EntityVO> {
        self.entity.as_ref()
    }

    /// Consumes the event, returning the entity (creates and updates)
    pub fn into_entity(self) -> Option<EntityVO> {
        self.entity
    }

    /// Consumes the event, returning the delete request (deletes only)
    pub fn into_delete_target(self) -> Option<DeleteTarget> {
        match self.action {
            Action::Delete => Some(DeleteTarget {
                key: self.entity_key,
                removed_secondary_ids: self.removed_secondary_ids,
            }),
            _ => None,
        }
    }
}
