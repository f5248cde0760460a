//! Tolerant batch decoder
//!
//! Converts a raw batch body into a [`DecodedBatch`]. Decoding is a pure
//! transformation with two failure granularities:
//!
//! - **Batch**: the body is not a JSON object of the expected envelope shape,
//!   or its cursor is invalid. [`BatchDecoder::decode`] returns `None` and
//!   the caller treats the batch as a no-op; the cursor is not advanced.
//! - **Entry**: one entry has an unrecognized discriminator or a body that
//!   does not match its kind. It decodes to [`RawEvent::Unknown`] and the
//!   rest of the batch is unaffected.
//!
//! ## Usage
//!
//! ```rust
//! use replisync_core::domain::{ContainerId, StreamConfig, StreamId, StreamKind};
//! use replisync_feed::BatchDecoder;
//!
//! let stream = StreamConfig::new(
//!     StreamId::new("s1".to_string()).unwrap(),
//!     StreamKind::Share { container: ContainerId::new("share-1".to_string()).unwrap() },
//! );
//! let batch = BatchDecoder::decode(&stream, br#"{"eventId": "ev-1", "events": []}"#).unwrap();
//! assert!(batch.events.is_empty());
//! ```

use tracing::{debug, warn};

use replisync_core::domain::{
    ContainerId, CursorToken, DecodedBatch, DeleteEvent, EntityEvent, LinkRecord, LocalId,
    RawEvent, StreamConfig,
};

use crate::wire::{
    WireAction, WireBatch, WireDeleteEntry, WireEntityEntry, WireLink, TAG_CREATE, TAG_DELETE,
    TAG_FIELD, TAG_UPDATE, TAG_UPDATE_METADATA,
};
use crate::EntryError;

/// Parser for change-feed batch bodies
pub struct BatchDecoder;

impl BatchDecoder {
    /// Decodes a batch body fetched for `stream`
    ///
    /// Returns `None` when the body as a whole cannot be parsed. Entries are
    /// returned in server order, `Unknown` placeholders included.
    pub fn decode(stream: &StreamConfig, body: &[u8]) -> Option<DecodedBatch> {
        let wire: WireBatch = match serde_json::from_slice(body) {
            Ok(wire) => wire,
            Err(err) => {
                warn!(
                    stream_id = %stream.stream_id,
                    bytes = body.len(),
                    error = %err,
                    "Discarding undecodable batch"
                );
                return None;
            }
        };

        let next_cursor = match wire.event_id.filter(|id| !id.is_empty()) {
            Some(raw) => match CursorToken::new(raw) {
                Ok(cursor) => Some(cursor),
                Err(err) => {
                    warn!(
                        stream_id = %stream.stream_id,
                        error = %err,
                        "Discarding batch with invalid cursor"
                    );
                    return None;
                }
            },
            None => None,
        };

        let implicit = stream.kind.implicit_container();
        let mut unknown = 0usize;
        let events: Vec<RawEvent> = wire
            .events
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                Self::decode_entry(value, implicit).unwrap_or_else(|err| {
                    unknown += 1;
                    debug!(
                        stream_id = %stream.stream_id,
                        index,
                        reason = %err,
                        "Entry decoded as unknown"
                    );
                    RawEvent::Unknown {
                        tag: match err {
                            EntryError::MissingTag => String::new(),
                            EntryError::UnrecognizedTag(tag)
                            | EntryError::Malformed { tag, .. }
                            | EntryError::ActionMismatch { tag, .. }
                            | EntryError::InvalidId { tag, .. } => tag,
                        },
                    }
                })
            })
            .collect();

        debug!(
            stream_id = %stream.stream_id,
            entries = events.len(),
            unknown,
            refresh = wire.refresh,
            more = wire.more,
            "Decoded batch"
        );

        Some(DecodedBatch {
            events,
            refresh: wire.refresh,
            more: wire.more,
            next_cursor,
        })
    }

    /// Decodes one entry against the shape selected by its discriminator
    fn decode_entry(
        value: serde_json::Value,
        implicit: Option<&ContainerId>,
    ) -> Result<RawEvent, EntryError> {
        let tag = value
            .get(TAG_FIELD)
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or(EntryError::MissingTag)?;

        match tag.as_str() {
            TAG_CREATE => {
                let event = Self::entity_event(&tag, value, WireAction::Create, implicit)?;
                Ok(RawEvent::Create(event))
            }
            TAG_UPDATE => {
                let event = Self::entity_event(&tag, value, WireAction::Update, implicit)?;
                Ok(RawEvent::UpdateContent(event))
            }
            TAG_UPDATE_METADATA => {
                let event = Self::entity_event(&tag, value, WireAction::Partial, implicit)?;
                Ok(RawEvent::UpdateMetadata(event))
            }
            TAG_DELETE => {
                let entry: WireDeleteEntry =
                    serde_json::from_value(value).map_err(|source| EntryError::Malformed {
                        tag: tag.clone(),
                        source,
                    })?;
                check_action(&tag, entry.action, WireAction::Delete)?;
                let local_id = LocalId::new(entry.link_id)
                    .map_err(|source| EntryError::InvalidId { tag: tag.clone(), source })?;
                let context = optional_container(&tag, entry.context_share_id)?;
                Ok(RawEvent::Delete(DeleteEvent {
                    local_id,
                    context,
                    context_hint: implicit.cloned(),
                    removed_secondary_ids: entry.removed_secondary_ids,
                }))
            }
            _ => Err(EntryError::UnrecognizedTag(tag)),
        }
    }

    fn entity_event(
        tag: &str,
        value: serde_json::Value,
        expected: WireAction,
        implicit: Option<&ContainerId>,
    ) -> Result<EntityEvent, EntryError> {
        let entry: WireEntityEntry =
            serde_json::from_value(value).map_err(|source| EntryError::Malformed {
                tag: tag.to_owned(),
                source,
            })?;
        check_action(tag, entry.action, expected)?;

        let context = optional_container(tag, entry.context_share_id)?;
        let WireLink {
            link_id,
            parent_link_id,
            share_id,
            name,
            kind,
            size,
            mime_type,
            modified_at,
            revision_id,
            state,
            invalidated_secondary_ids,
        } = entry.link;

        let local_id = LocalId::new(link_id).map_err(|source| EntryError::InvalidId {
            tag: tag.to_owned(),
            source,
        })?;
        let parent_id = match parent_link_id.filter(|p| !p.is_empty()) {
            Some(p) => Some(LocalId::new(p).map_err(|source| EntryError::InvalidId {
                tag: tag.to_owned(),
                source,
            })?),
            None => None,
        };
        let context_hint = match optional_container(tag, share_id)? {
            Some(hint) => Some(hint),
            None => implicit.cloned(),
        };

        Ok(EntityEvent {
            local_id,
            link: LinkRecord {
                parent_id,
                name,
                kind,
                size,
                mime_type,
                modified_at,
                revision_id,
                state,
            },
            context,
            context_hint,
            invalidated_secondary_ids,
        })
    }
}

fn check_action(tag: &str, found: WireAction, expected: WireAction) -> Result<(), EntryError> {
    if found == expected {
        Ok(())
    } else {
        Err(EntryError::ActionMismatch {
            tag: tag.to_owned(),
            action: found.as_str().to_owned(),
        })
    }
}

/// Parses an optional container id, treating `""` like an absent field
fn optional_container(tag: &str, raw: Option<String>) -> Result<Option<ContainerId>, EntryError> {
    match raw.filter(|s| !s.is_empty()) {
        Some(s) => ContainerId::new(s)
            .map(Some)
            .map_err(|source| EntryError::InvalidId {
                tag: tag.to_owned(),
                source,
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replisync_core::domain::{EntityKind, EventKind, LinkState, StreamId, StreamKind};

    fn volume_stream() -> StreamConfig {
        StreamConfig::new(
            StreamId::new("vol-1".to_string()).unwrap(),
            StreamKind::Volume { root: None },
        )
    }

    fn share_stream() -> StreamConfig {
        StreamConfig::new(
            StreamId::new("share-stream".to_string()).unwrap(),
            StreamKind::Share {
                container: ContainerId::new("share-9".to_string()).unwrap(),
            },
        )
    }

    fn container(id: &str) -> ContainerId {
        ContainerId::new(id.to_string()).unwrap()
    }

    const MIXED_BATCH: &str = r#"{
        "eventId": "ev-100",
        "refresh": false,
        "more": true,
        "events": [
            {
                "type": "CreateEvent",
                "action": "Create",
                "contextShareId": "share-1",
                "link": {
                    "linkId": "A",
                    "parentLinkId": "root",
                    "name": "a.txt",
                    "kind": "file",
                    "size": 12,
                    "mimeType": "text/plain",
                    "modifiedAt": "2026-01-01T00:00:00Z",
                    "revisionId": "r1",
                    "invalidatedSecondaryIds": ["thumb-A"]
                }
            },
            { "type": "ShareMemberEvent", "action": "Create", "memberId": "m1" },
            {
                "type": "UpdateMetadataEvent",
                "action": "Partial",
                "link": {
                    "linkId": "B",
                    "shareId": "share-2",
                    "name": "renamed",
                    "kind": "folder",
                    "modifiedAt": "2026-01-02T00:00:00Z",
                    "state": "trashed"
                }
            },
            {
                "type": "DeleteEvent",
                "action": "Delete",
                "linkId": "C",
                "contextShareId": null,
                "removedSecondaryIds": ["photo-1"]
            }
        ]
    }"#;

    #[test]
    fn test_decode_preserves_server_order_and_kinds() {
        let batch = BatchDecoder::decode(&volume_stream(), MIXED_BATCH.as_bytes()).unwrap();
        let kinds: Vec<_> = batch.events.iter().map(RawEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Create,
                EventKind::Unknown,
                EventKind::UpdateMetadata,
                EventKind::Delete
            ]
        );
        assert_eq!(batch.next_cursor.unwrap().as_str(), "ev-100");
        assert!(batch.more);
        assert!(!batch.refresh);
    }

    #[test]
    fn test_decode_create_fields() {
        let batch = BatchDecoder::decode(&volume_stream(), MIXED_BATCH.as_bytes()).unwrap();
        let RawEvent::Create(create) = &batch.events[0] else {
            panic!("expected create, got {:?}", batch.events[0]);
        };
        assert_eq!(create.local_id.as_str(), "A");
        assert_eq!(create.context, Some(container("share-1")));
        assert!(create.context_hint.is_none());
        assert_eq!(create.link.parent_id.as_ref().unwrap().as_str(), "root");
        assert_eq!(create.link.kind, EntityKind::File);
        assert_eq!(create.link.size, 12);
        assert_eq!(create.link.revision_id.as_deref(), Some("r1"));
        assert_eq!(create.invalidated_secondary_ids, vec!["thumb-A".to_string()]);
    }

    #[test]
    fn test_decode_payload_share_id_becomes_hint() {
        let batch = BatchDecoder::decode(&volume_stream(), MIXED_BATCH.as_bytes()).unwrap();
        let RawEvent::UpdateMetadata(update) = &batch.events[2] else {
            panic!("expected metadata update");
        };
        assert!(update.context.is_none());
        assert_eq!(update.context_hint, Some(container("share-2")));
        assert_eq!(update.link.state, LinkState::Trashed);
    }

    #[test]
    fn test_decode_delete_without_context() {
        let batch = BatchDecoder::decode(&volume_stream(), MIXED_BATCH.as_bytes()).unwrap();
        let RawEvent::Delete(delete) = &batch.events[3] else {
            panic!("expected delete");
        };
        assert_eq!(delete.local_id.as_str(), "C");
        assert!(delete.context.is_none());
        assert!(delete.context_hint.is_none());
        assert_eq!(delete.removed_secondary_ids, vec!["photo-1".to_string()]);
    }

    #[test]
    fn test_share_stream_stamps_its_container_as_hint() {
        let batch = BatchDecoder::decode(&share_stream(), MIXED_BATCH.as_bytes()).unwrap();
        let RawEvent::Delete(delete) = &batch.events[3] else {
            panic!("expected delete");
        };
        assert_eq!(delete.context_hint, Some(container("share-9")));

        // A payload hint still wins over the stream's container
        let RawEvent::UpdateMetadata(update) = &batch.events[2] else {
            panic!("expected metadata update");
        };
        assert_eq!(update.context_hint, Some(container("share-2")));
    }

    #[test]
    fn test_malformed_entry_degrades_to_unknown() {
        let body = r#"{"events": [
            {"type": "CreateEvent", "action": "Create", "link": {"linkId": "A"}}
        ]}"#;
        let batch = BatchDecoder::decode(&volume_stream(), body.as_bytes()).unwrap();
        assert_eq!(
            batch.events,
            vec![RawEvent::Unknown {
                tag: "CreateEvent".to_string()
            }]
        );
    }

    #[test]
    fn test_action_mismatch_degrades_to_unknown() {
        let body = r#"{"events": [
            {"type": "DeleteEvent", "action": "Create", "linkId": "A"}
        ]}"#;
        let batch = BatchDecoder::decode(&volume_stream(), body.as_bytes()).unwrap();
        assert_eq!(batch.events[0].kind(), EventKind::Unknown);
    }

    #[test]
    fn test_entry_without_tag_or_non_object_is_unknown() {
        let body = r#"{"events": [42, {"action": "Delete", "linkId": "A"}]}"#;
        let batch = BatchDecoder::decode(&volume_stream(), body.as_bytes()).unwrap();
        assert_eq!(batch.events.len(), 2);
        assert!(batch
            .events
            .iter()
            .all(|e| *e == RawEvent::Unknown { tag: String::new() }));
    }

    #[test]
    fn test_invalid_id_degrades_to_unknown() {
        let body = r#"{"events": [
            {"type": "DeleteEvent", "action": "Delete", "linkId": ""}
        ]}"#;
        let batch = BatchDecoder::decode(&volume_stream(), body.as_bytes()).unwrap();
        assert_eq!(batch.events[0].kind(), EventKind::Unknown);
    }

    #[test]
    fn test_unparsable_batch_is_none() {
        assert!(BatchDecoder::decode(&volume_stream(), b"not json").is_none());
        assert!(BatchDecoder::decode(&volume_stream(), b"[1, 2]").is_none());
        assert!(BatchDecoder::decode(&volume_stream(), br#"{"events": "oops"}"#).is_none());
    }

    #[test]
    fn test_invalid_cursor_discards_batch() {
        let body = r#"{"eventId": "has space", "events": []}"#;
        assert!(BatchDecoder::decode(&volume_stream(), body.as_bytes()).is_none());
    }

    #[test]
    fn test_refresh_flag_as_integer() {
        let body = r#"{"eventId": "ev-1", "refresh": 1, "events": []}"#;
        let batch = BatchDecoder::decode(&volume_stream(), body.as_bytes()).unwrap();
        assert!(batch.refresh);
        assert!(!batch.more);
    }

    #[test]
    fn test_null_flags_keep_batch() {
        let body = r#"{"eventId": "e1", "refresh": null, "more": null, "events": []}"#;
        let batch = BatchDecoder::decode(&volume_stream(), body.as_bytes()).unwrap();
        assert!(!batch.refresh);
        assert!(!batch.more);
        assert_eq!(batch.next_cursor.unwrap().as_str(), "e1");
    }

    #[test]
    fn test_empty_event_id_means_no_cursor() {
        let body = r#"{"eventId": "", "events": []}"#;
        let batch = BatchDecoder::decode(&volume_stream(), body.as_bytes()).unwrap();
        assert!(batch.next_cursor.is_none());
    }
}
