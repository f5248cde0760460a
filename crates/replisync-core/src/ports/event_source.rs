//! Event source port (driving side of the batch runner)
//!
//! Fetches one raw batch body per call. Transport concerns (HTTP,
//! authentication, pagination of the transport itself) belong to the
//! implementation; the engine only sees bytes.

use crate::domain::{CursorToken, StreamConfig};

/// Port trait for fetching raw change-feed batches
#[async_trait::async_trait]
pub trait IEventSource: Send + Sync {
    /// Fetches the batch that follows `cursor` for the given stream
    ///
    /// `cursor` is `None` on the first sync of a stream.
    async fn fetch_batch(
        &self,
        stream: &StreamConfig,
        cursor: Option<&CursorToken>,
    ) -> anyhow::Result<Vec<u8>>;
}
