//! Cursor store port (driven/secondary port)
//!
//! Persists the cursor of each stream between batches. The batch runner
//! only saves a cursor after the batch fetched with the previous one has been
//! applied in full.

use crate::domain::{CursorToken, StreamId};

/// Port trait for per-stream cursor persistence
#[async_trait::async_trait]
pub trait ICursorStore: Send + Sync {
    /// Returns the stored cursor, or `None` when the stream was never synced
    async fn load_cursor(&self, stream_id: &StreamId) -> anyhow::Result<Option<CursorToken>>;

    /// Stores the cursor to fetch the next batch from
    async fn save_cursor(&self, stream_id: &StreamId, cursor: &CursorToken) -> anyhow::Result<()>;
}
