//! Context resolution
//!
//! Every reconciled event is keyed by `(container, local id)`. The container
//! comes from, in order:
//!
//! 1. the explicit context carried by the entry,
//! 2. the hint embedded in the payload (or stamped by a share stream),
//! 3. for deletes only, the default container of the stream as returned by
//!    the [`IContainerDirectory`].
//!
//! Anything else is a per-event failure. The event is dropped; the batch is
//! not affected.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use replisync_core::domain::{
    ContainerId, DeleteEvent, EntityEvent, EntityKey, EntityVO, EventKind, LocalId, RawEvent,
    ReconciledEvent, StreamId,
};
use replisync_core::ports::IContainerDirectory;

/// Reasons a raw event cannot become a reconciled event
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The entry was not recognized by the decoder
    #[error("Unknown entry (type {tag:?})")]
    Unknown {
        /// Discriminator as found on the wire
        tag: String,
    },

    /// A create or update entry carries neither a context nor a hint
    #[error("No container for {kind} of {local_id}")]
    MissingContext {
        /// Kind of the event
        kind: EventKind,
        /// Entity the event targets
        local_id: LocalId,
    },

    /// The default-container lookup failed for a delete
    #[error("Default container lookup for delete of {local_id} failed: {source}")]
    Lookup {
        /// Entity the delete targets
        local_id: LocalId,
        /// Lookup error
        source: anyhow::Error,
    },
}

/// Turns raw events into reconciled events
pub struct ContextResolver {
    directory: Arc<dyn IContainerDirectory>,
}

impl ContextResolver {
    /// Creates a resolver backed by the given container directory
    pub fn new(directory: Arc<dyn IContainerDirectory>) -> Self {
        Self { directory }
    }

    /// Resolves the container of one event
    ///
    /// # Errors
    /// Returns a [`ResolveError`] when the event is unknown or its container
    /// cannot be determined. Callers drop the event and continue.
    pub async fn resolve(
        &self,
        stream_id: &StreamId,
        event: RawEvent,
    ) -> Result<ReconciledEvent, ResolveError> {
        match event {
            RawEvent::Create(e) => Ok(ReconciledEvent::create(entity_vo(EventKind::Create, e)?)),
            RawEvent::UpdateContent(e) => Ok(ReconciledEvent::update_content(entity_vo(
                EventKind::UpdateContent,
                e,
            )?)),
            RawEvent::UpdateMetadata(e) => Ok(ReconciledEvent::update_metadata(entity_vo(
                EventKind::UpdateMetadata,
                e,
            )?)),
            RawEvent::Delete(d) => self.resolve_delete(stream_id, d).await,
            RawEvent::Unknown { tag } => Err(ResolveError::Unknown { tag }),
        }
    }

    async fn resolve_delete(
        &self,
        stream_id: &StreamId,
        event: DeleteEvent,
    ) -> Result<ReconciledEvent, ResolveError> {
        let DeleteEvent {
            local_id,
            context,
            context_hint,
            removed_secondary_ids,
        } = event;

        let container = match context.or(context_hint) {
            Some(container) => container,
            None => {
                let container = self
                    .directory
                    .lookup_default_container(stream_id)
                    .await
                    .map_err(|source| ResolveError::Lookup {
                        local_id: local_id.clone(),
                        source,
                    })?;
                debug!(
                    stream_id = %stream_id,
                    local_id = %local_id,
                    container_id = %container,
                    "Resolved delete through default container"
                );
                container
            }
        };

        Ok(ReconciledEvent::delete(
            EntityKey::new(container, local_id),
            removed_secondary_ids,
        ))
    }
}

fn entity_vo(kind: EventKind, event: EntityEvent) -> Result<EntityVO, ResolveError> {
    let EntityEvent {
        local_id,
        link,
        context,
        context_hint,
        invalidated_secondary_ids,
    } = event;

    let container: ContainerId = context
        .or(context_hint)
        .ok_or_else(|| ResolveError::MissingContext {
            kind,
            local_id: local_id.clone(),
        })?;

    Ok(EntityVO {
        key: EntityKey::new(container, local_id),
        link,
        invalidated_secondary_ids,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use replisync_core::domain::{Action, EntityKind, LinkRecord, LinkState};

    use super::*;

    struct MockDirectory {
        default: Option<ContainerId>,
        lookups: Mutex<u32>,
    }

    impl MockDirectory {
        fn new(default: Option<&str>) -> Self {
            Self {
                default: default.map(container),
                lookups: Mutex::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl IContainerDirectory for MockDirectory {
        async fn lookup_default_container(
            &self,
            _stream_id: &StreamId,
        ) -> anyhow::Result<ContainerId> {
            *self.lookups.lock().unwrap() += 1;
            self.default
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no default container"))
        }
    }

    fn container(id: &str) -> ContainerId {
        ContainerId::new(id.to_string()).unwrap()
    }

    fn local(id: &str) -> LocalId {
        LocalId::new(id.to_string()).unwrap()
    }

    fn stream_id() -> StreamId {
        StreamId::new("vol-1".to_string()).unwrap()
    }

    fn entity_event(context: Option<&str>, hint: Option<&str>) -> EntityEvent {
        EntityEvent {
            local_id: local("A"),
            link: LinkRecord {
                parent_id: None,
                name: "a.txt".to_string(),
                kind: EntityKind::File,
                size: 1,
                mime_type: None,
                modified_at: Utc::now(),
                revision_id: None,
                state: LinkState::Active,
            },
            context: context.map(container),
            context_hint: hint.map(container),
            invalidated_secondary_ids: vec![],
        }
    }

    fn delete_event(context: Option<&str>) -> DeleteEvent {
        DeleteEvent {
            local_id: local("D"),
            context: context.map(container),
            context_hint: None,
            removed_secondary_ids: vec!["thumb".to_string()],
        }
    }

    #[tokio::test]
    async fn test_explicit_context_wins_over_hint() {
        let resolver = ContextResolver::new(Arc::new(MockDirectory::new(None)));
        let event = resolver
            .resolve(
                &stream_id(),
                RawEvent::Create(entity_event(Some("ctx"), Some("hint"))),
            )
            .await
            .unwrap();
        assert_eq!(event.action(), Action::Create);
        assert_eq!(event.entity_key().container_id(), &container("ctx"));
    }

    #[tokio::test]
    async fn test_hint_used_when_context_missing() {
        let resolver = ContextResolver::new(Arc::new(MockDirectory::new(None)));
        let event = resolver
            .resolve(
                &stream_id(),
                RawEvent::UpdateMetadata(entity_event(None, Some("hint"))),
            )
            .await
            .unwrap();
        assert_eq!(event.action(), Action::Partial);
        assert_eq!(event.entity_key().container_id(), &container("hint"));
    }

    #[tokio::test]
    async fn test_create_without_context_is_not_looked_up() {
        let directory = Arc::new(MockDirectory::new(Some("default")));
        let resolver = ContextResolver::new(directory.clone());
        let err = resolver
            .resolve(&stream_id(), RawEvent::Create(entity_event(None, None)))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingContext { .. }));
        assert_eq!(*directory.lookups.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_falls_back_to_default_container() {
        let directory = Arc::new(MockDirectory::new(Some("default")));
        let resolver = ContextResolver::new(directory.clone());
        let event = resolver
            .resolve(&stream_id(), RawEvent::Delete(delete_event(None)))
            .await
            .unwrap();
        assert_eq!(event.entity_key().container_id(), &container("default"));
        assert_eq!(*directory.lookups.lock().unwrap(), 1);
        let target = event.into_delete_target().unwrap();
        assert_eq!(target.removed_secondary_ids, vec!["thumb".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_with_context_skips_lookup() {
        let directory = Arc::new(MockDirectory::new(Some("default")));
        let resolver = ContextResolver::new(directory.clone());
        let event = resolver
            .resolve(&stream_id(), RawEvent::Delete(delete_event(Some("ctx"))))
            .await
            .unwrap();
        assert_eq!(event.entity_key().container_id(), &container("ctx"));
        assert_eq!(*directory.lookups.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_a_resolve_error() {
        let resolver = ContextResolver::new(Arc::new(MockDirectory::new(None)));
        let err = resolver
            .resolve(&stream_id(), RawEvent::Delete(delete_event(None)))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Lookup { .. }));
    }

    #[tokio::test]
    async fn test_unknown_is_rejected() {
        let resolver = ContextResolver::new(Arc::new(MockDirectory::new(None)));
        let err = resolver
            .resolve(
                &stream_id(),
                RawEvent::Unknown {
                    tag: "ShareEvent".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ShareEvent"));
    }
}
