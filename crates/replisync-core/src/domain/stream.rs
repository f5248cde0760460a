//! Stream configuration
//!
//! A stream is one independently cursor-tracked change feed. Volume streams
//! cover every container of a volume; share streams are scoped to a single
//! container.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::newtypes::{ContainerId, CursorToken, StreamId};

/// The family a stream belongs to, with the data needed to scope its events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamKind {
    /// Volume-wide feed; entries name their own container
    Volume {
        /// Root container of the volume, the reset target (if known)
        #[serde(default)]
        root: Option<ContainerId>,
    },
    /// Feed of a single shared container
    Share {
        /// The shared container every entry belongs to
        container: ContainerId,
    },
}

impl StreamKind {
    /// Stable name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::Volume { .. } => "volume",
            StreamKind::Share { .. } => "share",
        }
    }

    /// Container that implicitly scopes every entry of this stream, if any
    pub fn implicit_container(&self) -> Option<&ContainerId> {
        match self {
            StreamKind::Volume { .. } => None,
            StreamKind::Share { container } => Some(container),
        }
    }

    /// Container whose subtree a reset directive invalidates
    ///
    /// `None` means the stream kind has no well-defined reset target; a
    /// reset arriving for it is a configuration mismatch.
    pub fn reset_target(&self) -> Option<&ContainerId> {
        match self {
            StreamKind::Volume { root } => root.as_ref(),
            StreamKind::Share { container } => Some(container),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the engine needs to know about the stream a batch came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream identifier
    pub stream_id: StreamId,
    /// Stream family and scoping data
    #[serde(flatten)]
    pub kind: StreamKind,
    /// Cursor the current batch was fetched from (None on first sync)
    #[serde(default)]
    pub cursor: Option<CursorToken>,
}

impl StreamConfig {
    /// Creates a stream configuration with no cursor yet
    pub fn new(stream_id: StreamId, kind: StreamKind) -> Self {
        Self {
            stream_id,
            kind,
            cursor: None,
        }
    }

    /// Returns a copy positioned at the given cursor
    #[must_use]
    pub fn with_cursor(mut self, cursor: Option<CursorToken>) -> Self {
        self.cursor = cursor;
        self
    }
}
