//! Stream runner
//!
//! The [`StreamSyncService`] drives the reconciler for a set of streams:
//!
//! ```text
//! load cursor ──→ fetch ──→ reconcile ──Applied──→ save next cursor ──more?──→ fetch ...
//!                   ↑            │
//!                   └──retry─────┘ (retryable errors, exponential backoff)
//! ```
//!
//! - One batch at a time per stream: each stream has its own async mutex.
//! - Streams run concurrently, bounded by `max_concurrent_streams`.
//! - The cursor only advances after a batch was applied in full. A discarded
//!   batch or a failed one leaves it untouched, so the same batch is fetched
//!   again on the next cycle.
//!
//! ## Retry Logic
//!
//! A failed batch is refetched and reapplied as a whole with exponential
//! backoff: `base_delay * 2^attempt`, up to `max_retries` retries. Reset
//! directives on streams without a target and cancellations are not retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use replisync_core::config::Config;
use replisync_core::domain::{CursorToken, StreamConfig, StreamId};
use replisync_core::ports::{ICursorStore, IEventSource};

use crate::reconciler::{BatchOutcome, ReconcileReport, Reconciler};
use crate::SyncError;

// ============================================================================
// Retry logic
// ============================================================================

/// Backoff schedule for whole-batch retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each further one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Executes a batch operation with exponential backoff retry
///
/// Only retries errors for which [`SyncError::is_retryable`] holds. A
/// cancellation during the backoff sleep ends the loop with
/// [`SyncError::Cancelled`].
async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    f: F,
) -> Result<T, SyncError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if attempt < policy.max_retries && err.is_retryable() => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Batch failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ============================================================================
// StreamSyncResult
// ============================================================================

/// Summary of one sync cycle of a stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamSyncResult {
    /// Stream that was synced
    pub stream_id: StreamId,
    /// Reports of the batches applied, in order
    pub batches: Vec<ReconcileReport>,
    /// The cycle ended on an undecodable batch
    pub discarded: bool,
    /// Cursor persisted at the end of the cycle
    pub cursor: Option<CursorToken>,
}

impl StreamSyncResult {
    fn new(stream_id: StreamId, cursor: Option<CursorToken>) -> Self {
        Self {
            stream_id,
            batches: Vec::new(),
            discarded: false,
            cursor,
        }
    }

    /// Entities handed to any apply port across the cycle
    pub fn applied(&self) -> usize {
        self.batches.iter().map(ReconcileReport::applied).sum()
    }

    /// Entries dropped across the cycle
    pub fn dropped(&self) -> usize {
        self.batches.iter().map(|b| b.dropped).sum()
    }
}

// ============================================================================
// StreamSyncService
// ============================================================================

/// Fetches, reconciles and checkpoints change-feed batches
///
/// ## Dependencies
///
/// - `reconciler`: Applies one batch
/// - `source`: Fetches raw batch bodies
/// - `cursors`: Persists per-stream cursors
pub struct StreamSyncService {
    reconciler: Arc<Reconciler>,
    source: Arc<dyn IEventSource>,
    cursors: Arc<dyn ICursorStore>,
    /// One lock per stream; a stream never has two batches in flight
    locks: DashMap<StreamId, Arc<Mutex<()>>>,
    max_concurrent_streams: usize,
    max_batches_per_cycle: u32,
    retry: RetryPolicy,
}

impl StreamSyncService {
    /// Creates a stream runner with default limits
    pub fn new(
        reconciler: Arc<Reconciler>,
        source: Arc<dyn IEventSource>,
        cursors: Arc<dyn ICursorStore>,
    ) -> Self {
        Self {
            reconciler,
            source,
            cursors,
            locks: DashMap::new(),
            max_concurrent_streams: 4,
            max_batches_per_cycle: 50,
            retry: RetryPolicy::default(),
        }
    }

    /// Applies the `sync` and `retry` sections of the configuration
    #[must_use]
    pub fn with_config(mut self, config: &Config) -> Self {
        self.max_concurrent_streams = config.sync.max_concurrent_streams.max(1);
        self.max_batches_per_cycle = config.sync.max_batches_per_cycle.max(1);
        self.retry = RetryPolicy {
            max_retries: config.retry.max_retries,
            base_delay: Duration::from_millis(config.retry.base_delay_ms),
        };
        self
    }

    /// Overrides the retry policy
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn stream_lock(&self, stream_id: &StreamId) -> Arc<Mutex<()>> {
        self.locks
            .entry(stream_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs one sync cycle for a stream
    ///
    /// Loads the stored cursor (falling back to the one configured on the
    /// stream), then fetches and applies batches while the server reports
    /// more, up to `max_batches_per_cycle`.
    ///
    /// # Errors
    /// Returns the error of the batch that could not be applied after
    /// retries. The cursor of every batch applied before it is kept.
    #[tracing::instrument(skip(self, stream, cancel), fields(stream_id = %stream.stream_id))]
    pub async fn sync_stream(
        &self,
        stream: &StreamConfig,
        cancel: &CancellationToken,
    ) -> Result<StreamSyncResult, SyncError> {
        let lock = self.stream_lock(&stream.stream_id);
        let _guard = lock.lock().await;

        let stored = self
            .cursors
            .load_cursor(&stream.stream_id)
            .await
            .map_err(|source| SyncError::Cursor {
                stream_id: stream.stream_id.clone(),
                source,
            })?;
        let mut cursor = stored.or_else(|| stream.cursor.clone());
        let mut result = StreamSyncResult::new(stream.stream_id.clone(), cursor.clone());

        while (result.batches.len() as u32) < self.max_batches_per_cycle {
            let positioned = stream.clone().with_cursor(cursor.clone());
            let outcome = self.fetch_and_reconcile(&positioned, cancel).await?;

            let report = match outcome {
                BatchOutcome::Applied(report) => report,
                BatchOutcome::Discarded => {
                    warn!(
                        stream_id = %stream.stream_id,
                        cursor = ?cursor,
                        "Batch discarded, cursor not advanced"
                    );
                    result.discarded = true;
                    break;
                }
            };

            let next = report.next_cursor.clone();
            let more = report.more;
            result.batches.push(report);

            let Some(next) = next else {
                break;
            };
            self.cursors
                .save_cursor(&stream.stream_id, &next)
                .await
                .map_err(|source| SyncError::Cursor {
                    stream_id: stream.stream_id.clone(),
                    source,
                })?;
            cursor = Some(next);
            result.cursor = cursor.clone();

            if !more {
                break;
            }
        }

        if result.batches.len() as u32 >= self.max_batches_per_cycle {
            info!(
                stream_id = %stream.stream_id,
                batches = result.batches.len(),
                "Batch budget reached, continuing next cycle"
            );
        }

        info!(
            stream_id = %stream.stream_id,
            batches = result.batches.len(),
            applied = result.applied(),
            dropped = result.dropped(),
            "Stream cycle complete"
        );
        Ok(result)
    }

    async fn fetch_and_reconcile(
        &self,
        stream: &StreamConfig,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, SyncError> {
        let events = &self.source;
        let reconciler = &self.reconciler;

        with_retry("fetch_and_reconcile", self.retry, cancel, move || async move {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let body = events
                .fetch_batch(stream, stream.cursor.as_ref())
                .await
                .map_err(|source| SyncError::Fetch {
                    stream_id: stream.stream_id.clone(),
                    source,
                })?;
            reconciler.reconcile_batch(stream, &body, cancel).await
        })
        .await
    }

    /// Runs one sync cycle for every stream, several at a time
    ///
    /// Results are returned in completion order. A stream whose task panicked
    /// is logged and left out.
    pub async fn sync_all(
        self: &Arc<Self>,
        streams: Vec<StreamConfig>,
        cancel: &CancellationToken,
    ) -> Vec<(StreamId, Result<StreamSyncResult, SyncError>)> {
        let permits = Arc::new(Semaphore::new(self.max_concurrent_streams));
        let mut tasks = JoinSet::new();

        for stream in streams {
            let service = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => service.sync_stream(&stream, &cancel).await,
                    Err(_) => Err(SyncError::Cancelled),
                };
                (stream.stream_id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((stream_id, result)) => {
                    if let Err(err) = &result {
                        error!(stream_id = %stream_id, error = %err, "Stream sync failed");
                    }
                    results.push((stream_id, result));
                }
                Err(err) => error!(error = %err, "Stream sync task failed"),
            }
        }
        results
    }
}
