//! Directory-backed event source
//!
//! Serves batch bodies from files laid out as
//!
//! ```text
//! <batch_dir>/<stream_id>/initial.json   first batch of the stream
//! <batch_dir>/<stream_id>/<cursor>.json  batch that follows <cursor>
//! ```
//!
//! A missing file means the feed has nothing new after that cursor. It is
//! served as an empty batch that keeps the cursor where it is.
//!
//! Stream ids and cursors are opaque server strings, so each is escaped into
//! a single path component: `%`, `/` and `\` become `%25`, `%2F` and `%5C`,
//! and a leading `.` becomes `%2E`. A base64 cursor such as `ab/cd==` is
//! therefore read from `ab%2Fcd==.json`, and no cursor can leave `<batch_dir>`.

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;
use tracing::debug;

use replisync_core::domain::{CursorToken, StreamConfig};
use replisync_core::ports::IEventSource;

/// File name of the first batch of a stream
const INITIAL_BATCH: &str = "initial";

pub struct DirectoryEventSource {
    root: PathBuf,
}

impl DirectoryEventSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the batch that follows `cursor`
    pub fn batch_path(&self, stream: &StreamConfig, cursor: Option<&CursorToken>) -> PathBuf {
        let name = cursor.map_or_else(
            || INITIAL_BATCH.to_string(),
            |c| file_component(c.as_str()),
        );
        self.root
            .join(file_component(stream.stream_id.as_str()))
            .join(format!("{name}.json"))
    }
}

/// Escapes an opaque id into one path component that cannot climb or nest
fn file_component(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for (i, c) in id.chars().enumerate() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            '.' if i == 0 => out.push_str("%2E"),
            c => out.push(c),
        }
    }
    out
}

fn empty_batch(cursor: Option<&CursorToken>) -> Vec<u8> {
    let body = match cursor {
        Some(cursor) => serde_json::json!({ "eventId": cursor.as_str(), "events": [] }),
        None => serde_json::json!({ "events": [] }),
    };
    body.to_string().into_bytes()
}

#[async_trait::async_trait]
impl IEventSource for DirectoryEventSource {
    async fn fetch_batch(
        &self,
        stream: &StreamConfig,
        cursor: Option<&CursorToken>,
    ) -> anyhow::Result<Vec<u8>> {
        let path = self.batch_path(stream, cursor);
        match tokio::fs::read(&path).await {
            Ok(body) => {
                debug!(path = %path.display(), bytes = body.len(), "Read batch file");
                Ok(body)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No batch file, feed is caught up");
                Ok(empty_batch(cursor))
            }
            Err(err) => Err(err)
                .with_context(|| format!("Failed to read batch file {}", path.display())),
        }
    }
}
