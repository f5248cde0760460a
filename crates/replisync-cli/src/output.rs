//! Output formatting for human and JSON modes
//!
//! Besides the formatters, [`ChangeTotals`] renders the per-group change
//! counts that `apply` (one batch) and `replay` (a whole cycle) both print.

use replisync_sync::ReconcileReport;

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

/// Trait for formatting CLI output
pub trait OutputFormatter {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    fn print_json(&self, value: &serde_json::Value);
}

/// Human-readable output with status marks and indentation
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("\u{2713} {}", message);
    }
    fn error(&self, message: &str) {
        eprintln!("\u{2717} Error: {}", message);
    }
    fn warn(&self, message: &str) {
        eprintln!("\u{26a0} Warning: {}", message);
    }
    fn info(&self, message: &str) {
        println!("  {}", message);
    }
    fn print_json(&self, _value: &serde_json::Value) {}
}

/// One JSON document per call on stdout; diagnostics on stderr
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        println!("{}", serde_json::json!({"success": true, "message": message}));
    }
    fn error(&self, message: &str) {
        eprintln!("{}", serde_json::json!({"success": false, "error": message}));
    }
    fn warn(&self, message: &str) {
        eprintln!("{}", serde_json::json!({"level": "warning", "message": message}));
    }
    fn info(&self, _message: &str) {}
    fn print_json(&self, value: &serde_json::Value) {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Human => Box::new(HumanFormatter),
    }
}

/// Change counts summed over one or more applied batches
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChangeTotals {
    pub created: usize,
    pub updated: usize,
    pub partial: usize,
    pub deleted: usize,
    pub dropped: usize,
    pub resets: usize,
}

impl ChangeTotals {
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a ReconcileReport>) -> Self {
        reports.into_iter().fold(Self::default(), |mut totals, report| {
            totals.created += report.created;
            totals.updated += report.updated;
            totals.partial += report.partial;
            totals.deleted += report.deleted;
            totals.dropped += report.dropped;
            totals.resets += usize::from(report.reset);
            totals
        })
    }

    /// Label/count rows in apply order, labels padded to one column
    pub fn rows(&self) -> Vec<String> {
        let mut rows = vec![
            ("Created", self.created),
            ("Updated", self.updated),
            ("Partial", self.partial),
            ("Deleted", self.deleted),
        ];
        if self.resets > 0 {
            rows.push(("Resets", self.resets));
        }
        rows.into_iter()
            .map(|(label, count)| format!("{:<9}{count}", format!("{label}:")))
            .collect()
    }

    /// Prints the rows as info lines and warns about dropped entries
    pub fn print(&self, formatter: &dyn OutputFormatter) {
        for row in self.rows() {
            formatter.info(&row);
        }
        if self.dropped > 0 {
            formatter.warn(&format!(
                "{} entries dropped (unknown kind or unresolved container)",
                self.dropped
            ));
        }
    }
}
