//! Batch reconciler
//!
//! The [`Reconciler`] applies one decoded batch to the local replica.
//!
//! ## Flow
//!
//! ```text
//! body ──decode──→ DecodedBatch ──refresh?──yes──→ reset_subtree(target)
//!                                    │
//!                                    no
//!                                    ↓
//!                  classify (resolve, drop failures) ──→ group by action
//!                                    ↓
//!                  create → update_content → update_metadata → delete
//! ```
//!
//! ## Transactions
//!
//! Each group is handed to its apply port as one list and the port commits
//! it in its own unit of work. Groups are not wrapped in a common
//! transaction: when a group fails, the groups before it stay applied and the
//! rest are skipped. Recovery is redelivery of the whole batch, which the
//! idempotent ports absorb.
//!
//! ## Cancellation
//!
//! The cancellation token is checked before each apply call. A call that has
//! started always runs to completion.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use replisync_core::domain::{
    Action, ActionGroup, BatchId, CursorToken, DecodedBatch, DeleteTarget, EntityVO, RawEvent,
    ReconciledEvent, StreamConfig,
};
use replisync_core::ports::{ApplyUnit, IReplicaStore};
use replisync_feed::BatchDecoder;

use crate::resolver::ContextResolver;
use crate::SyncError;

/// Fixed order in which action groups are applied
const APPLY_ORDER: [ActionGroup; 4] = [
    ActionGroup::Create,
    ActionGroup::UpdateContent,
    ActionGroup::UpdateMetadata,
    ActionGroup::Delete,
];

// ============================================================================
// Report
// ============================================================================

/// Summary of one applied batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Correlation id of the batch
    pub batch_id: BatchId,
    /// Entities handed to the create port
    pub created: usize,
    /// Entities handed to the content-update port
    pub updated: usize,
    /// Entities handed to the metadata-update port
    pub partial: usize,
    /// Keys handed to the delete port
    pub deleted: usize,
    /// Entries dropped as unknown or unresolvable
    pub dropped: usize,
    /// The batch was a reset directive
    pub reset: bool,
    /// Cursor to persist now that the batch is applied
    pub next_cursor: Option<CursorToken>,
    /// Another batch is available right away
    pub more: bool,
    /// When the last apply call returned
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl ReconcileReport {
    fn new(batch_id: BatchId, batch: &DecodedBatch) -> Self {
        Self {
            batch_id,
            created: 0,
            updated: 0,
            partial: 0,
            deleted: 0,
            dropped: 0,
            reset: false,
            next_cursor: batch.next_cursor.clone(),
            more: batch.more,
            finished_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Number of entities handed to any apply port
    pub fn applied(&self) -> usize {
        self.created + self.updated + self.partial + self.deleted
    }

    fn record(&mut self, group: ActionGroup, count: usize) {
        match group {
            ActionGroup::Create => self.created = count,
            ActionGroup::UpdateContent => self.updated = count,
            ActionGroup::UpdateMetadata => self.partial = count,
            ActionGroup::Delete => self.deleted = count,
            ActionGroup::Reset => self.reset = true,
        }
    }

    fn finish(mut self, start: Instant) -> Self {
        self.finished_at = Utc::now();
        self.duration_ms = start.elapsed().as_millis() as u64;
        self
    }
}

/// Result of handing one raw body to the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch was applied; its cursor may be persisted
    Applied(ReconcileReport),
    /// The body could not be decoded; nothing was applied and the cursor
    /// must stay where it is
    Discarded,
}

// ============================================================================
// Grouping
// ============================================================================

/// Reconciled events partitioned by action, each in server order
#[derive(Debug, Default)]
struct ActionGroups {
    creates: Vec<EntityVO>,
    updates: Vec<EntityVO>,
    partials: Vec<EntityVO>,
    deletes: Vec<DeleteTarget>,
}

impl ActionGroups {
    fn push(&mut self, event: ReconciledEvent) {
        match event.action() {
            Action::Create => self.creates.extend(event.into_entity()),
            Action::Update => self.updates.extend(event.into_entity()),
            Action::Partial => self.partials.extend(event.into_entity()),
            Action::Delete => self.deletes.extend(event.into_delete_target()),
        }
    }

    fn len(&self, group: ActionGroup) -> usize {
        match group {
            ActionGroup::Create => self.creates.len(),
            ActionGroup::UpdateContent => self.updates.len(),
            ActionGroup::UpdateMetadata => self.partials.len(),
            ActionGroup::Delete => self.deletes.len(),
            ActionGroup::Reset => 0,
        }
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// Applies decoded batches through the replica apply ports
///
/// ## Dependencies
///
/// - `store`: Batched apply operations, one unit of work per call
/// - `resolver`: Container resolution for each event
pub struct Reconciler {
    store: Arc<dyn IReplicaStore>,
    resolver: ContextResolver,
}

impl Reconciler {
    /// Creates a reconciler over the given apply ports and resolver
    pub fn new(store: Arc<dyn IReplicaStore>, resolver: ContextResolver) -> Self {
        Self { store, resolver }
    }

    /// Decodes a raw batch body and applies it
    ///
    /// # Returns
    /// [`BatchOutcome::Discarded`] when the body cannot be decoded, otherwise
    /// the report of the applied batch.
    ///
    /// # Errors
    /// See [`Reconciler::apply`].
    #[tracing::instrument(skip(self, stream, body, cancel), fields(stream_id = %stream.stream_id))]
    pub async fn reconcile_batch(
        &self,
        stream: &StreamConfig,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, SyncError> {
        match BatchDecoder::decode(stream, body) {
            Some(batch) => self
                .apply(stream, batch, cancel)
                .await
                .map(BatchOutcome::Applied),
            None => Ok(BatchOutcome::Discarded),
        }
    }

    /// Applies a decoded batch
    ///
    /// A batch with the refresh indicator set results in exactly one
    /// `reset_subtree` call and nothing else. Otherwise events are resolved,
    /// grouped and applied group by group in the fixed order.
    ///
    /// # Errors
    /// - [`SyncError::NoResetTarget`] if a reset arrives for a stream without a target
    /// - [`SyncError::Reset`] / [`SyncError::Apply`] if an apply call fails;
    ///   later groups are skipped
    /// - [`SyncError::Cancelled`] if `cancel` fired before a pending apply call
    pub async fn apply(
        &self,
        stream: &StreamConfig,
        batch: DecodedBatch,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, SyncError> {
        let start = Instant::now();
        let batch_id = BatchId::new();
        let mut report = ReconcileReport::new(batch_id, &batch);

        if batch.refresh {
            self.apply_reset(stream, batch_id, batch.events.len(), cancel)
                .await?;
            report.record(ActionGroup::Reset, 1);
            let report = report.finish(start);
            info!(
                stream_id = %stream.stream_id,
                batch_id = %batch_id,
                duration_ms = report.duration_ms,
                "Applied reset directive"
            );
            return Ok(report);
        }

        let (groups, dropped) = self.classify(stream, batch.events).await;
        report.dropped = dropped;

        for group in APPLY_ORDER {
            let count = groups.len(group);
            if count == 0 {
                continue;
            }
            if cancel.is_cancelled() {
                warn!(
                    stream_id = %stream.stream_id,
                    batch_id = %batch_id,
                    pending = %group,
                    "Batch cancelled before apply"
                );
                return Err(SyncError::Cancelled);
            }

            let unit = ApplyUnit::new(&stream.stream_id, batch_id, group);
            self.apply_group(unit, &groups)
                .await
                .map_err(|source| SyncError::Apply { group, source })?;
            report.record(group, count);
            debug!(
                stream_id = %stream.stream_id,
                batch_id = %batch_id,
                group = %group,
                count,
                "Applied action group"
            );
        }

        let report = report.finish(start);
        info!(
            stream_id = %stream.stream_id,
            batch_id = %batch_id,
            created = report.created,
            updated = report.updated,
            partial = report.partial,
            deleted = report.deleted,
            dropped = report.dropped,
            duration_ms = report.duration_ms,
            "Applied batch"
        );
        Ok(report)
    }

    async fn apply_reset(
        &self,
        stream: &StreamConfig,
        batch_id: BatchId,
        ignored: usize,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let target = stream
            .kind
            .reset_target()
            .ok_or_else(|| SyncError::NoResetTarget {
                stream_id: stream.stream_id.clone(),
                kind: stream.kind.name(),
            })?;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        if ignored > 0 {
            debug!(
                stream_id = %stream.stream_id,
                ignored,
                "Reset directive overrides listed events"
            );
        }

        let unit = ApplyUnit::new(&stream.stream_id, batch_id, ActionGroup::Reset);
        self.store
            .reset_subtree(unit, target)
            .await
            .map_err(|source| SyncError::Reset {
                container: target.clone(),
                source,
            })
    }

    /// Resolves every event in server order, dropping the ones that fail
    async fn classify(&self, stream: &StreamConfig, events: Vec<RawEvent>) -> (ActionGroups, usize) {
        let mut groups = ActionGroups::default();
        let mut dropped = 0;

        for (index, event) in events.into_iter().enumerate() {
            match self.resolver.resolve(&stream.stream_id, event).await {
                Ok(reconciled) => groups.push(reconciled),
                Err(err) => {
                    dropped += 1;
                    warn!(
                        stream_id = %stream.stream_id,
                        index,
                        reason = %err,
                        "Dropping event"
                    );
                }
            }
        }

        (groups, dropped)
    }

    async fn apply_group(&self, unit: ApplyUnit<'_>, groups: &ActionGroups) -> anyhow::Result<()> {
        match unit.group {
            ActionGroup::Create => self.store.create_many(unit, &groups.creates).await,
            ActionGroup::UpdateContent => self.store.update_content_many(unit, &groups.updates).await,
            ActionGroup::UpdateMetadata => {
                self.store.update_metadata_many(unit, &groups.partials).await
            }
            ActionGroup::Delete => self.store.delete_many(unit, &groups.deletes).await,
            ActionGroup::Reset => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use replisync_core::domain::{ContainerId, EntityKey, StreamId, StreamKind};
    use replisync_core::ports::IContainerDirectory;

    use super::*;

    /// One recorded apply call
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Create(Vec<String>),
        UpdateContent(Vec<String>),
        UpdateMetadata(Vec<String>),
        Delete(Vec<String>),
        Reset(String),
    }

    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<Call>>,
        fail_on: Option<ActionGroup>,
        cancel_during: Option<(ActionGroup, CancellationToken)>,
    }

    impl RecordingStore {
        fn failing_on(group: ActionGroup) -> Self {
            Self {
                fail_on: Some(group),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, unit: ApplyUnit<'_>, call: Call) -> anyhow::Result<()> {
            if let Some((group, token)) = &self.cancel_during {
                if *group == unit.group {
                    token.cancel();
                }
            }
            if self.fail_on == Some(unit.group) {
                anyhow::bail!("simulated {} failure", unit.group);
            }
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    fn keys(entities: &[EntityVO]) -> Vec<String> {
        entities.iter().map(|e| e.key.to_string()).collect()
    }

    #[async_trait::async_trait]
    impl IReplicaStore for RecordingStore {
        async fn create_many(&self, unit: ApplyUnit<'_>, entities: &[EntityVO]) -> anyhow::Result<()> {
            self.record(unit, Call::Create(keys(entities)))
        }

        async fn update_content_many(
            &self,
            unit: ApplyUnit<'_>,
            entities: &[EntityVO],
        ) -> anyhow::Result<()> {
            self.record(unit, Call::UpdateContent(keys(entities)))
        }

        async fn update_metadata_many(
            &self,
            unit: ApplyUnit<'_>,
            entities: &[EntityVO],
        ) -> anyhow::Result<()> {
            self.record(unit, Call::UpdateMetadata(keys(entities)))
        }

        async fn delete_many(
            &self,
            unit: ApplyUnit<'_>,
            targets: &[DeleteTarget],
        ) -> anyhow::Result<()> {
            let keys = targets.iter().map(|t| t.key.to_string()).collect();
            self.record(unit, Call::Delete(keys))
        }

        async fn reset_subtree(
            &self,
            unit: ApplyUnit<'_>,
            container_id: &ContainerId,
        ) -> anyhow::Result<()> {
            self.record(unit, Call::Reset(container_id.to_string()))
        }
    }

    struct FixedDirectory(Option<&'static str>);

    #[async_trait::async_trait]
    impl IContainerDirectory for FixedDirectory {
        async fn lookup_default_container(
            &self,
            stream_id: &StreamId,
        ) -> anyhow::Result<ContainerId> {
            match self.0 {
                Some(id) => Ok(ContainerId::new(id.to_string())?),
                None => anyhow::bail!("no default container for {stream_id}"),
            }
        }
    }

    fn reconciler(store: Arc<RecordingStore>, default: Option<&'static str>) -> Reconciler {
        Reconciler::new(
            store,
            ContextResolver::new(Arc::new(FixedDirectory(default))),
        )
    }

    fn volume(root: Option<&str>) -> StreamConfig {
        StreamConfig::new(
            StreamId::new("vol-1".to_string()).unwrap(),
            StreamKind::Volume {
                root: root.map(|r| ContainerId::new(r.to_string()).unwrap()),
            },
        )
    }

    fn entry(tag: &str, action: &str, id: &str) -> String {
        format!(
            r#"{{"type": "{tag}", "action": "{action}", "contextShareId": "s1",
                "link": {{"linkId": "{id}", "name": "{id}.txt", "kind": "file",
                          "modifiedAt": "2026-01-01T00:00:00Z"}}}}"#
        )
    }

    fn delete(id: &str, context: Option<&str>) -> String {
        match context {
            Some(c) => format!(
                r#"{{"type": "DeleteEvent", "action": "Delete", "linkId": "{id}", "contextShareId": "{c}"}}"#
            ),
            None => format!(r#"{{"type": "DeleteEvent", "action": "Delete", "linkId": "{id}"}}"#),
        }
    }

    fn body(refresh: bool, entries: &[String]) -> Vec<u8> {
        format!(
            r#"{{"eventId": "ev-2", "refresh": {refresh}, "more": false, "events": [{}]}}"#,
            entries.join(",")
        )
        .into_bytes()
    }

    fn applied(outcome: BatchOutcome) -> ReconcileReport {
        match outcome {
            BatchOutcome::Applied(report) => report,
            BatchOutcome::Discarded => panic!("batch was discarded"),
        }
    }

    #[tokio::test]
    async fn test_groups_apply_in_fixed_order_regardless_of_server_order() {
        let store = Arc::new(RecordingStore::default());
        let reconciler = reconciler(store.clone(), None);
        let body = body(
            false,
            &[
                delete("Z", Some("s1")),
                entry("UpdateMetadataEvent", "Partial", "A"),
                entry("UpdateEvent", "Update", "B"),
                entry("CreateEvent", "Create", "A"),
                entry("CreateEvent", "Create", "C"),
            ],
        );

        let report = applied(
            reconciler
                .reconcile_batch(&volume(None), &body, &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(
            store.calls(),
            vec![
                Call::Create(vec!["s1/A".to_string(), "s1/C".to_string()]),
                Call::UpdateContent(vec!["s1/B".to_string()]),
                Call::UpdateMetadata(vec!["s1/A".to_string()]),
                Call::Delete(vec!["s1/Z".to_string()]),
            ]
        );
        assert_eq!(report.created, 2);
        assert_eq!(report.applied(), 5);
        assert_eq!(report.next_cursor.unwrap().as_str(), "ev-2");
    }

    #[tokio::test]
    async fn test_reset_precedence() {
        let store = Arc::new(RecordingStore::default());
        let reconciler = reconciler(store.clone(), None);
        let body = body(
            true,
            &[entry("CreateEvent", "Create", "A"), delete("B", Some("s1"))],
        );

        let report = applied(
            reconciler
                .reconcile_batch(&volume(Some("root")), &body, &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(store.calls(), vec![Call::Reset("root".to_string())]);
        assert!(report.reset);
        assert_eq!(report.applied(), 0);
    }

    #[tokio::test]
    async fn test_reset_without_target_is_fatal() {
        let store = Arc::new(RecordingStore::default());
        let reconciler = reconciler(store.clone(), None);

        let err = reconciler
            .reconcile_batch(&volume(None), &body(true, &[]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::NoResetTarget { .. }));
        assert!(!err.is_retryable());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_entry_is_tolerated() {
        let store = Arc::new(RecordingStore::default());
        let reconciler = reconciler(store.clone(), None);
        let body = body(
            false,
            &[
                entry("CreateEvent", "Create", "A"),
                r#"{"type": "ShareMemberEvent", "action": "Create"}"#.to_string(),
            ],
        );

        let report = applied(
            reconciler
                .reconcile_batch(&volume(None), &body, &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(store.calls(), vec![Call::Create(vec!["s1/A".to_string()])]);
        assert_eq!(report.dropped, 1);
    }

    #[tokio::test]
    async fn test_delete_uses_default_container_when_lookup_succeeds() {
        let store = Arc::new(RecordingStore::default());
        let reconciler = reconciler(store.clone(), Some("primary"));

        reconciler
            .reconcile_batch(
                &volume(None),
                &body(false, &[delete("D", None)]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            store.calls(),
            vec![Call::Delete(vec!["primary/D".to_string()])]
        );
    }

    #[tokio::test]
    async fn test_delete_dropped_when_lookup_fails_others_still_apply() {
        let store = Arc::new(RecordingStore::default());
        let reconciler = reconciler(store.clone(), None);
        let body = body(
            false,
            &[delete("D", None), entry("CreateEvent", "Create", "A")],
        );

        let report = applied(
            reconciler
                .reconcile_batch(&volume(None), &body, &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(store.calls(), vec![Call::Create(vec!["s1/A".to_string()])]);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn test_failed_create_skips_remaining_groups() {
        let store = Arc::new(RecordingStore::failing_on(ActionGroup::Create));
        let reconciler = reconciler(store.clone(), None);
        let body = body(
            false,
            &[
                entry("CreateEvent", "Create", "A"),
                entry("UpdateEvent", "Update", "B"),
                entry("UpdateMetadataEvent", "Partial", "C"),
                delete("D", Some("s1")),
            ],
        );

        let err = reconciler
            .reconcile_batch(&volume(None), &body, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Apply {
                group: ActionGroup::Create,
                ..
            }
        ));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_partial_keeps_earlier_groups() {
        let store = Arc::new(RecordingStore::failing_on(ActionGroup::UpdateMetadata));
        let reconciler = reconciler(store.clone(), None);
        let body = body(
            false,
            &[
                entry("CreateEvent", "Create", "A"),
                entry("UpdateMetadataEvent", "Partial", "A"),
                delete("A", Some("s1")),
            ],
        );

        let result = reconciler
            .reconcile_batch(&volume(None), &body, &CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert_eq!(store.calls(), vec![Call::Create(vec!["s1/A".to_string()])]);
    }

    #[tokio::test]
    async fn test_undecodable_batch_is_discarded() {
        let store = Arc::new(RecordingStore::default());
        let reconciler = reconciler(store.clone(), None);

        let outcome = reconciler
            .reconcile_batch(&volume(None), b"{ truncated", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, BatchOutcome::Discarded);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_applies_nothing() {
        let store = Arc::new(RecordingStore::default());
        let reconciler = reconciler(store.clone(), None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = reconciler
            .reconcile_batch(
                &volume(None),
                &body(false, &[entry("CreateEvent", "Create", "A")]),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_lets_in_flight_group_finish() {
        let cancel = CancellationToken::new();
        let store = Arc::new(RecordingStore {
            cancel_during: Some((ActionGroup::Create, cancel.clone())),
            ..Default::default()
        });
        let reconciler = reconciler(store.clone(), None);
        let body = body(
            false,
            &[
                entry("CreateEvent", "Create", "A"),
                delete("A", Some("s1")),
            ],
        );

        let err = reconciler
            .reconcile_batch(&volume(None), &body, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(store.calls(), vec![Call::Create(vec!["s1/A".to_string()])]);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let store = Arc::new(RecordingStore::default());
        let reconciler = reconciler(store.clone(), None);

        let report = reconciler
            .apply(&volume(None), DecodedBatch::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(store.calls().is_empty());
        assert_eq!(report.applied(), 0);
        assert!(report.next_cursor.is_none());
    }

    #[test]
    fn test_entity_key_display_matches_recorded_keys() {
        let key = EntityKey::new(
            ContainerId::new("s1".to_string()).unwrap(),
            replisync_core::domain::LocalId::new("A".to_string()).unwrap(),
        );
        assert_eq!(key.to_string(), "s1/A");
    }
}
