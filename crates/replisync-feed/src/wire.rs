//! Wire-level JSON structures of the change feed
//!
//! These mirror the JSON exactly (camelCase). They are deserialized in two
//! stages: the batch envelope with its entries kept as raw values, then each
//! entry against the shape selected by its `type` discriminator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use replisync_core::domain::{EntityKind, LinkState};

/// Discriminator of a create entry
pub(crate) const TAG_CREATE: &str = "CreateEvent";
/// Discriminator of a full (content) update entry
pub(crate) const TAG_UPDATE: &str = "UpdateEvent";
/// Discriminator of a metadata-only update entry
pub(crate) const TAG_UPDATE_METADATA: &str = "UpdateMetadataEvent";
/// Discriminator of a delete entry
pub(crate) const TAG_DELETE: &str = "DeleteEvent";

/// Name of the discriminator field on every entry
pub(crate) const TAG_FIELD: &str = "type";

/// Batch envelope
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireBatch {
    /// Cursor of the next batch
    #[serde(default)]
    pub event_id: Option<String>,

    /// Reset directive
    #[serde(default, deserialize_with = "flag")]
    pub refresh: bool,

    /// More batches are immediately available
    #[serde(default, deserialize_with = "flag")]
    pub more: bool,

    /// Entries, decoded one by one afterwards
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

/// Boolean flag sent as `true`/`false`, as a number, or as `null`
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum WireFlag {
    Bool(bool),
    Int(i64),
}

/// Decodes a batch flag; `null` and `0` are unset, any other number is set
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<WireFlag>::deserialize(deserializer)? {
        Some(WireFlag::Bool(b)) => b,
        Some(WireFlag::Int(n)) => n != 0,
        None => false,
    })
}

/// `action` enum carried by every entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub(crate) enum WireAction {
    Create,
    Update,
    Partial,
    Delete,
}

impl WireAction {
    pub fn as_str(self) -> &'static str {
        match self {
            WireAction::Create => "Create",
            WireAction::Update => "Update",
            WireAction::Partial => "Partial",
            WireAction::Delete => "Delete",
        }
    }
}

/// Shape shared by `CreateEvent`, `UpdateEvent` and `UpdateMetadataEvent`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireEntityEntry {
    pub action: WireAction,
    pub link: WireLink,
    #[serde(default)]
    pub context_share_id: Option<String>,
}

/// Shape of `DeleteEvent`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireDeleteEntry {
    pub action: WireAction,
    pub link_id: String,
    #[serde(default)]
    pub context_share_id: Option<String>,
    #[serde(default)]
    pub removed_secondary_ids: Vec<String>,
}

/// Entity payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireLink {
    pub link_id: String,
    #[serde(default)]
    pub parent_link_id: Option<String>,
    /// Container embedded in the payload (context hint)
    #[serde(default)]
    pub share_id: Option<String>,
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub revision_id: Option<String>,
    #[serde(default)]
    pub state: LinkState,
    #[serde(default)]
    pub invalidated_secondary_ids: Vec<String>,
}
