//! Replay command - Run the stream runner over the batch directory
//!
//! Provides the `replisync replay` CLI command which:
//! 1. Registers the container of every configured stream
//! 2. Runs one sync cycle per stream, several streams at a time
//! 3. With `--watch`, repeats every `sync.poll_interval` seconds until Ctrl-C

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use replisync_core::domain::{StreamConfig, StreamId};
use replisync_sync::{StreamSyncResult, StreamSyncService, SyncError};

use super::{build_reconciler, open_store, register_stream, CliContext};
use crate::output::{get_formatter, ChangeTotals, OutputFormatter};
use crate::source::DirectoryEventSource;

#[derive(Debug, Args)]
pub struct ReplayCommand {
    /// Only replay these streams (repeatable)
    #[arg(long = "stream", value_name = "STREAM_ID")]
    pub streams: Vec<String>,

    /// Keep polling the batch directory
    #[arg(long)]
    pub watch: bool,
}

impl ReplayCommand {
    fn selected_streams(&self, configured: &[StreamConfig]) -> Vec<StreamConfig> {
        configured
            .iter()
            .filter(|s| {
                self.streams.is_empty() || self.streams.iter().any(|id| id == s.stream_id.as_str())
            })
            .cloned()
            .collect()
    }

    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);

        let streams = self.selected_streams(&ctx.config.streams);
        if streams.is_empty() {
            formatter.error(&format!(
                "No matching streams configured in {}",
                ctx.config_path.display()
            ));
            return Ok(());
        }

        let store = open_store(&ctx.config).await?;
        for stream in &streams {
            register_stream(&store, stream).await?;
        }

        let service = Arc::new(
            StreamSyncService::new(
                Arc::new(build_reconciler(&store)),
                Arc::new(DirectoryEventSource::new(&ctx.config.feed.batch_dir)),
                store.clone(),
            )
            .with_config(&ctx.config),
        );

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, finishing in-flight batches");
                on_signal.cancel();
            }
        });

        let poll_interval = Duration::from_secs(ctx.config.sync.poll_interval.max(1));
        let failed = loop {
            info!(
                streams = streams.len(),
                batch_dir = %ctx.config.feed.batch_dir.display(),
                "Starting replay cycle"
            );
            let results = service.sync_all(streams.clone(), &cancel).await;
            let failed = report_cycle(&*formatter, ctx.format.is_json(), &results)?;

            if !self.watch || cancel.is_cancelled() {
                break failed;
            }
            tokio::select! {
                _ = cancel.cancelled() => break failed,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        };

        if failed > 0 {
            anyhow::bail!("{failed} stream(s) did not complete; they will be retried on the next run");
        }
        Ok(())
    }
}

/// Prints the outcome of one cycle and returns the number of failed streams
fn report_cycle(
    formatter: &dyn OutputFormatter,
    json: bool,
    results: &[(StreamId, Result<StreamSyncResult, SyncError>)],
) -> Result<usize> {
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();

    if json {
        let entries: Vec<serde_json::Value> = results
            .iter()
            .map(|(stream_id, result)| match result {
                Ok(summary) => serde_json::to_value(summary)
                    .map(|value| {
                        serde_json::json!({
                            "stream_id": stream_id.as_str(),
                            "ok": true,
                            "result": value,
                        })
                    })
                    .context("Failed to serialize stream result"),
                Err(err) => Ok(serde_json::json!({
                    "stream_id": stream_id.as_str(),
                    "ok": false,
                    "error": err.to_string(),
                    "retryable": err.is_retryable(),
                })),
            })
            .collect::<Result<_>>()?;
        formatter.print_json(&serde_json::json!({ "streams": entries, "failed": failed }));
        return Ok(failed);
    }

    for (stream_id, result) in results {
        match result {
            Ok(summary) => {
                formatter.success(&format!(
                    "{}: {} batch(es), {} change(s) applied",
                    stream_id,
                    summary.batches.len(),
                    summary.applied()
                ));
                ChangeTotals::from_reports(&summary.batches).print(formatter);
                if summary.discarded {
                    formatter.warn(&format!(
                        "{stream_id}: undecodable batch discarded, cursor kept"
                    ));
                }
                if let Some(cursor) = &summary.cursor {
                    formatter.info(&format!("Cursor:  {cursor}"));
                }
            }
            Err(err) => {
                warn!(stream_id = %stream_id, error = %err, "Stream did not complete");
                formatter.error(&format!("{stream_id}: sync did not complete, will retry ({err})"));
            }
        }
    }
    Ok(failed)
}
