//! Apply command - Reconcile one batch file
//!
//! Provides the `replisync apply` CLI command which:
//! 1. Builds the stream from the command line (share or volume)
//! 2. Reconciles the batch file against the replica database
//! 3. Persists the batch cursor once the batch has been applied

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args};
use tokio_util::sync::CancellationToken;
use tracing::info;

use replisync_core::domain::{ContainerId, StreamConfig, StreamId, StreamKind};
use replisync_core::ports::ICursorStore;
use replisync_sync::{BatchOutcome, ReconcileReport};

use super::{build_reconciler, open_store, register_stream, CliContext};
use crate::output::{get_formatter, ChangeTotals, OutputFormatter};

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("stream_kind").required(true).args(["share", "volume"])))]
pub struct ApplyCommand {
    /// Stream the batch belongs to
    #[arg(long)]
    pub stream: String,

    /// The stream is scoped to this shared container
    #[arg(long, value_name = "CONTAINER")]
    pub share: Option<String>,

    /// The stream is volume-wide
    #[arg(long)]
    pub volume: bool,

    /// Root container of a volume stream (reset target)
    #[arg(long, value_name = "CONTAINER", requires = "volume")]
    pub root: Option<String>,

    /// Batch body to apply
    #[arg(long)]
    pub batch: PathBuf,
}

impl ApplyCommand {
    fn stream_config(&self) -> Result<StreamConfig> {
        let stream_id = StreamId::new(self.stream.clone()).context("Invalid --stream")?;
        let kind = match &self.share {
            Some(container) => StreamKind::Share {
                container: ContainerId::new(container.clone()).context("Invalid --share")?,
            },
            None => StreamKind::Volume {
                root: self
                    .root
                    .clone()
                    .map(ContainerId::new)
                    .transpose()
                    .context("Invalid --root")?,
            },
        };
        Ok(StreamConfig::new(stream_id, kind))
    }

    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let stream = self.stream_config()?;

        let body = tokio::fs::read(&self.batch)
            .await
            .with_context(|| format!("Failed to read batch file {}", self.batch.display()))?;

        let store = open_store(&ctx.config).await?;
        register_stream(&store, &stream).await?;
        let reconciler = build_reconciler(&store);

        info!(
            stream_id = %stream.stream_id,
            kind = %stream.kind,
            batch = %self.batch.display(),
            "Applying batch file"
        );

        let outcome = reconciler
            .reconcile_batch(&stream, &body, &CancellationToken::new())
            .await
            .context("Batch did not apply; the cursor was not advanced")?;

        let report = match outcome {
            BatchOutcome::Applied(report) => report,
            BatchOutcome::Discarded => {
                if ctx.format.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "stream_id": stream.stream_id.as_str(),
                        "discarded": true,
                    }));
                } else {
                    formatter.warn("Batch could not be decoded and was discarded");
                }
                return Ok(());
            }
        };

        if let Some(cursor) = &report.next_cursor {
            store
                .save_cursor(&stream.stream_id, cursor)
                .await
                .context("Failed to persist cursor")?;
        }

        if ctx.format.is_json() {
            formatter.print_json(
                &serde_json::to_value(&report).context("Failed to serialize report")?,
            );
        } else {
            print_report(&*formatter, &stream, &report);
        }
        Ok(())
    }
}

fn print_report(
    formatter: &dyn OutputFormatter,
    stream: &StreamConfig,
    report: &ReconcileReport,
) {
    if report.reset {
        formatter.success(&format!(
            "Stream {} reset; its subtree will be rehydrated",
            stream.stream_id
        ));
    } else {
        formatter.success(&format!(
            "Applied batch to stream {} in {} ms",
            stream.stream_id, report.duration_ms
        ));
    }
    ChangeTotals::from_reports([report]).print(formatter);
    match &report.next_cursor {
        Some(cursor) => formatter.info(&format!("Cursor:  {cursor}")),
        None => formatter.info("Cursor:  unchanged (batch carried none)"),
    }
}
