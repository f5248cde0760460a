//! Configuration module for Replisync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{StreamConfig, StreamKind};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Replisync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub store: StoreConfig,
    pub feed: FeedConfig,
    pub logging: LoggingConfig,
    /// Streams the batch runner keeps in sync.
    pub streams: Vec<StreamConfig>,
}

/// Batch runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between polling cycles when running continuously.
    pub poll_interval: u64,
    /// Maximum number of streams reconciled in parallel.
    pub max_concurrent_streams: usize,
    /// Upper bound on batches pulled for one stream in a single cycle.
    pub max_batches_per_cycle: u32,
}

/// Whole-batch retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retries of a failed batch before giving up for this cycle.
    pub max_retries: u32,
    /// Base delay of the exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
}

/// Local replica store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite replica database.
    pub database: PathBuf,
}

/// Directory-backed feed used by `replisync replay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Directory holding `<stream>/<cursor>.json` batch files.
    pub batch_dir: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON-formatted log lines.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/replisync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("replisync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: 30,
            max_concurrent_streams: 4,
            max_batches_per_cycle: 50,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1000,
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("replisync")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: data_dir().join("replica.db"),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            batch_dir: data_dir().join("feed"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.max_concurrent_streams"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Largest backoff exponent the retry loop will reach without overflow.
const MAX_RETRIES_LIMIT: u32 = 16;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.poll_interval == 0 {
            errors.push(ValidationError {
                field: "sync.poll_interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.max_concurrent_streams == 0 || self.sync.max_concurrent_streams > 64 {
            errors.push(ValidationError {
                field: "sync.max_concurrent_streams".into(),
                message: "must be in range 1..=64".into(),
            });
        }
        if self.sync.max_batches_per_cycle == 0 {
            errors.push(ValidationError {
                field: "sync.max_batches_per_cycle".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- retry ---
        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            errors.push(ValidationError {
                field: "retry.max_retries".into(),
                message: format!("must not exceed {MAX_RETRIES_LIMIT}"),
            });
        }
        if self.retry.base_delay_ms == 0 {
            errors.push(ValidationError {
                field: "retry.base_delay_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- store ---
        if self.store.database.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "store.database".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        // --- streams ---
        let mut seen = HashSet::new();
        for (i, stream) in self.streams.iter().enumerate() {
            if !seen.insert(stream.stream_id.clone()) {
                errors.push(ValidationError {
                    field: format!("streams[{i}].stream_id"),
                    message: format!("duplicate stream id '{}'", stream.stream_id),
                });
            }
            if let StreamKind::Volume { root: None } = stream.kind {
                errors.push(ValidationError {
                    field: format!("streams[{i}].root"),
                    message: "volume streams need a root container to honour reset directives"
                        .into(),
                });
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use replisync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .store_database(PathBuf::from("/tmp/replica.db"))
///     .sync_max_concurrent_streams(2)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn sync_poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval = seconds;
        self
    }

    pub fn sync_max_concurrent_streams(mut self, n: usize) -> Self {
        self.config.sync.max_concurrent_streams = n;
        self
    }

    pub fn sync_max_batches_per_cycle(mut self, n: u32) -> Self {
        self.config.sync.max_batches_per_cycle = n;
        self
    }

    pub fn retry_max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay_ms = ms;
        self
    }

    pub fn store_database(mut self, path: PathBuf) -> Self {
        self.config.store.database = path;
        self
    }

    pub fn feed_batch_dir(mut self, path: PathBuf) -> Self {
        self.config.feed.batch_dir = path;
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    pub fn stream(mut self, stream: StreamConfig) -> Self {
        self.config.streams.push(stream);
        self
    }

    /// Consume the builder and return the [`Config`] without validation.
    pub fn build(self) -> Config {
        self.config
    }

    /// Consume the builder, validate, and return the [`Config`] or errors.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let errors = self.config.validate();
        if errors.is_empty() {
            Ok(self.config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::domain::{ContainerId, StreamId};

    fn share_stream(id: &str) -> StreamConfig {
        StreamConfig::new(
            StreamId::new(id.to_string()).unwrap(),
            StreamKind::Share {
                container: ContainerId::new(format!("{id}-share")).unwrap(),
            },
        )
    }

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.sync.poll_interval, 30);
        assert_eq!(cfg.sync.max_concurrent_streams, 4);
        assert_eq!(cfg.sync.max_batches_per_cycle, 50);
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.base_delay_ms, 1000);
        assert!(cfg.store.database.ends_with("replica.db"));
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
        assert!(cfg.streams.is_empty());
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
sync:
  poll_interval: 60
  max_concurrent_streams: 2
  max_batches_per_cycle: 10
retry:
  max_retries: 3
  base_delay_ms: 250
store:
  database: /tmp/replica-test.db
feed:
  batch_dir: /tmp/feed
logging:
  level: debug
  json: true
streams:
  - stream_id: vol-1
    kind: volume
    root: root-share
  - stream_id: share-stream
    kind: share
    container: share-7
    cursor: ev-9
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.sync.poll_interval, 60);
        assert_eq!(cfg.sync.max_concurrent_streams, 2);
        assert_eq!(cfg.sync.max_batches_per_cycle, 10);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.base_delay_ms, 250);
        assert_eq!(cfg.store.database, PathBuf::from("/tmp/replica-test.db"));
        assert_eq!(cfg.feed.batch_dir, PathBuf::from("/tmp/feed"));
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert_eq!(cfg.streams.len(), 2);
        assert_eq!(cfg.streams[1].kind.name(), "share");
        assert_eq!(cfg.streams[1].cursor.as_ref().unwrap().as_str(), "ev-9");
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn load_partial_yaml_fills_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"logging:\n  level: warn\n").unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.logging.level, "warn");
        assert_eq!(cfg.sync.max_concurrent_streams, 4);
        assert_eq!(cfg.retry.max_retries, 5);
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg.sync.poll_interval, 30);
    }

    #[test]
    fn load_returns_error_on_invalid_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"sync: [not, a, map]").unwrap();
        tmp.flush().unwrap();

        assert!(Config::load(tmp.path()).is_err());
    }

    // -- Validation --

    #[test]
    fn validate_catches_zero_values() {
        let cfg = ConfigBuilder::new()
            .sync_poll_interval(0)
            .sync_max_concurrent_streams(0)
            .sync_max_batches_per_cycle(0)
            .retry_base_delay_ms(0)
            .build();
        let fields: Vec<_> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"sync.poll_interval".to_string()));
        assert!(fields.contains(&"sync.max_concurrent_streams".to_string()));
        assert!(fields.contains(&"sync.max_batches_per_cycle".to_string()));
        assert!(fields.contains(&"retry.base_delay_ms".to_string()));
    }

    #[test]
    fn validate_catches_excessive_retries() {
        let cfg = ConfigBuilder::new().retry_max_retries(40).build();
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "retry.max_retries");
    }

    #[test]
    fn validate_catches_invalid_log_level() {
        let cfg = ConfigBuilder::new().logging_level("verbose").build();
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "logging.level");
    }

    #[test]
    fn validate_catches_duplicate_streams() {
        let cfg = ConfigBuilder::new()
            .stream(share_stream("s1"))
            .stream(share_stream("s1"))
            .build();
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "streams[1].stream_id");
    }

    #[test]
    fn validate_catches_volume_without_root() {
        let stream = StreamConfig::new(
            StreamId::new("vol".to_string()).unwrap(),
            StreamKind::Volume { root: None },
        );
        let errors = ConfigBuilder::new().stream(stream).build().validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "streams[0].root");
    }

    #[test]
    fn builder_build_validated_fails_for_invalid_config() {
        let result = ConfigBuilder::new().logging_level("loud").build_validated();
        assert!(result.is_err());
    }

    #[test]
    fn builder_build_validated_succeeds_for_valid_config() {
        let cfg = ConfigBuilder::new()
            .store_database(PathBuf::from("/tmp/r.db"))
            .stream(share_stream("s1"))
            .build_validated()
            .expect("valid config");
        assert_eq!(cfg.streams.len(), 1);
    }

    #[test]
    fn default_path_ends_with_config_yaml() {
        let path = Config::default_path();
        assert!(path.ends_with("replisync/config.yaml"));
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            field: "sync.poll_interval".into(),
            message: "must be greater than 0".into(),
        };
        assert_eq!(err.to_string(), "sync.poll_interval: must be greater than 0");
    }
}
