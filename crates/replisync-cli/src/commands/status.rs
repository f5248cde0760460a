//! Status command - Display stream cursors and replica counts
//!
//! Provides the `replisync status` CLI command which:
//! 1. Lists every configured stream plus any stream known only to the database
//! 2. Shows the persisted cursor of each stream and when it last moved
//! 3. Shows how many replica entries each stream last wrote
//! 4. Lists registered containers, flagging those awaiting rehydration

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tracing::info;

use replisync_cache::{ContainerRecord, CursorRecord, SqliteReplicaStore};
use replisync_core::domain::{StreamConfig, StreamId};

use super::{open_store, CliContext};
use crate::output::{get_formatter, OutputFormatter};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Only show this stream
    #[arg(long, value_name = "STREAM_ID")]
    pub stream: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContainerStatus {
    container_id: String,
    is_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    invalidated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct StreamStatus {
    stream_id: String,
    /// `share`, `volume`, or `unconfigured` when only the database knows it
    kind: String,
    cursor: Option<String>,
    cursor_updated_at: Option<DateTime<Utc>>,
    entities: u64,
    containers: Vec<ContainerStatus>,
}

impl From<&ContainerRecord> for ContainerStatus {
    fn from(record: &ContainerRecord) -> Self {
        Self {
            container_id: record.container_id.to_string(),
            is_default: record.is_default,
            invalidated_at: record.invalidated_at,
        }
    }
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);

        let db_path = &ctx.config.store.database;
        if !db_path.exists() {
            formatter.error(&format!(
                "No replica database at {}. Run 'replisync apply' or 'replisync replay' first.",
                db_path.display()
            ));
            return Ok(());
        }

        let store = open_store(&ctx.config).await?;
        let cursors = store.list_cursors().await.context("Failed to list cursors")?;

        let kinds = stream_kinds(&ctx.config.streams, &cursors, self.stream.as_deref());
        info!(streams = kinds.len(), "Showing stream status");

        let mut statuses = Vec::with_capacity(kinds.len());
        for (stream_id, kind) in kinds {
            statuses.push(stream_status(&store, &cursors, stream_id, kind).await?);
        }

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "database": db_path.display().to_string(),
                "streams": serde_json::to_value(&statuses)
                    .context("Failed to serialize stream status")?,
            }));
            return Ok(());
        }

        if statuses.is_empty() {
            formatter.warn("No streams configured or recorded");
            return Ok(());
        }
        formatter.success(&format!("Replica database ({})", db_path.display()));
        for status in &statuses {
            print_stream(&*formatter, status);
        }
        Ok(())
    }
}

/// Streams to report on, keyed by id, with the kind name of each
///
/// Configured streams come first; cursors for streams no longer in the
/// configuration are still shown so stale state is visible.
fn stream_kinds(
    configured: &[StreamConfig],
    cursors: &[CursorRecord],
    filter: Option<&str>,
) -> BTreeMap<StreamId, String> {
    let mut kinds = BTreeMap::new();
    for stream in configured {
        kinds.insert(stream.stream_id.clone(), stream.kind.name().to_string());
    }
    for record in cursors {
        kinds
            .entry(record.stream_id.clone())
            .or_insert_with(|| "unconfigured".to_string());
    }
    if let Some(only) = filter {
        kinds.retain(|id, _| id.as_str() == only);
    }
    kinds
}

async fn stream_status(
    store: &SqliteReplicaStore,
    cursors: &[CursorRecord],
    stream_id: StreamId,
    kind: String,
) -> Result<StreamStatus> {
    let cursor = cursors.iter().find(|c| c.stream_id == stream_id);
    let entities = store
        .count_stream_entities(&stream_id)
        .await
        .with_context(|| format!("Failed to count entities of stream {stream_id}"))?;
    let containers = store
        .list_containers(&stream_id)
        .await
        .with_context(|| format!("Failed to list containers of stream {stream_id}"))?;

    Ok(StreamStatus {
        stream_id: stream_id.to_string(),
        kind,
        cursor: cursor.map(|c| c.cursor.to_string()),
        cursor_updated_at: cursor.map(|c| c.updated_at),
        entities,
        containers: containers.iter().map(ContainerStatus::from).collect(),
    })
}

fn print_stream(formatter: &dyn OutputFormatter, status: &StreamStatus) {
    formatter.info("");
    formatter.info(&format!("{} ({})", status.stream_id, status.kind));
    match (&status.cursor, status.cursor_updated_at) {
        (Some(cursor), Some(at)) => formatter.info(&format!(
            "  Cursor:     {} (at {})",
            cursor,
            at.format("%Y-%m-%d %H:%M:%S UTC")
        )),
        _ => formatter.info("  Cursor:     none, next sync starts from the beginning"),
    }
    formatter.info(&format!("  Entities:   {}", status.entities));
    for container in &status.containers {
        let marker = if container.is_default { " (default)" } else { "" };
        match container.invalidated_at {
            Some(at) => formatter.warn(&format!(
                "{}: container {}{} reset at {}, awaiting rehydration",
                status.stream_id,
                container.container_id,
                marker,
                at.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            None => formatter.info(&format!(
                "  Container:  {}{}",
                container.container_id, marker
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use replisync_core::domain::{ContainerId, CursorToken, StreamKind};

    use super::*;

    fn share(id: &str) -> StreamConfig {
        StreamConfig::new(
            StreamId::new(id.to_string()).unwrap(),
            StreamKind::Share {
                container: ContainerId::new(format!("c-{id}")).unwrap(),
            },
        )
    }

    fn cursor(id: &str) -> CursorRecord {
        CursorRecord {
            stream_id: StreamId::new(id.to_string()).unwrap(),
            cursor: CursorToken::new("ev-1".to_string()).unwrap(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_database_only_streams_are_listed() {
        let kinds = stream_kinds(&[share("a")], &[cursor("a"), cursor("old")], None);

        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds[&StreamId::new("a".to_string()).unwrap()], "share");
        assert_eq!(
            kinds[&StreamId::new("old".to_string()).unwrap()],
            "unconfigured"
        );
    }

    #[test]
    fn test_filter_keeps_only_named_stream() {
        let kinds = stream_kinds(&[share("a"), share("b")], &[], Some("b"));

        assert_eq!(kinds.len(), 1);
        assert!(kinds.contains_key(&StreamId::new("b".to_string()).unwrap()));
    }
}
