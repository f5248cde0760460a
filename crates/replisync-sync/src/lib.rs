//! Replisync Sync - Reconciliation engine
//!
//! Provides:
//! - Context resolution for entries that do not name their container
//! - Grouped, ordered application of a batch through the replica apply ports
//! - A stream runner that fetches batches, retries failed ones and advances cursors
//!
//! ## Modules
//!
//! - [`resolver`] - Resolves the container of each raw event
//! - [`reconciler`] - Classifies, groups and applies one batch
//! - [`scheduler`] - Runs streams concurrently, one batch at a time per stream

pub mod reconciler;
pub mod resolver;
pub mod scheduler;

pub use reconciler::{BatchOutcome, ReconcileReport, Reconciler};
pub use resolver::{ContextResolver, ResolveError};
pub use scheduler::{RetryPolicy, StreamSyncResult, StreamSyncService};

use thiserror::Error;

use replisync_core::domain::{ActionGroup, ContainerId, StreamId};

/// Errors that fail a whole batch
///
/// Per-entry problems (unknown kinds, unresolved contexts) never show up
/// here; they are dropped during classification.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An action-group apply call failed; later groups were not attempted
    #[error("Apply of {group} group failed: {source}")]
    Apply {
        /// Group whose call failed
        group: ActionGroup,
        /// Adapter error
        source: anyhow::Error,
    },

    /// The full-reset call failed
    #[error("Reset of container {container} failed: {source}")]
    Reset {
        /// Container that was being reset
        container: ContainerId,
        /// Adapter error
        source: anyhow::Error,
    },

    /// A reset directive arrived for a stream with no reset target
    #[error("Stream {stream_id} of kind {kind} received a reset directive but has no reset target")]
    NoResetTarget {
        /// Stream the directive arrived on
        stream_id: StreamId,
        /// Stream kind name
        kind: &'static str,
    },

    /// The batch was cancelled between action groups
    #[error("Batch cancelled")]
    Cancelled,

    /// The event source could not deliver the batch
    #[error("Fetching batch for stream {stream_id} failed: {source}")]
    Fetch {
        /// Stream being fetched
        stream_id: StreamId,
        /// Source error
        source: anyhow::Error,
    },

    /// The cursor could not be loaded or saved
    #[error("Cursor persistence for stream {stream_id} failed: {source}")]
    Cursor {
        /// Stream whose cursor was involved
        stream_id: StreamId,
        /// Store error
        source: anyhow::Error,
    },
}

impl SyncError {
    /// Whether refetching and reapplying the same batch may succeed
    ///
    /// Storage and transport failures are retried; a reset directive on a
    /// stream without a reset target is a configuration mismatch and a
    /// cancellation is a request to stop.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Apply { .. }
            | SyncError::Reset { .. }
            | SyncError::Fetch { .. }
            | SyncError::Cursor { .. } => true,
            SyncError::NoResetTarget { .. } | SyncError::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_failures_are_retryable() {
        let err = SyncError::Apply {
            group: ActionGroup::Create,
            source: anyhow::anyhow!("database is locked"),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("create"));
    }

    #[test]
    fn test_misuse_and_cancellation_are_not_retryable() {
        let err = SyncError::NoResetTarget {
            stream_id: StreamId::new("vol-1".to_string()).unwrap(),
            kind: "volume",
        };
        assert!(!err.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }
}
