//! Replisync Feed - Change-feed wire format
//!
//! Turns raw batch bodies into ordered sequences of typed
//! [`RawEvent`](replisync_core::domain::RawEvent)s.
//!
//! ## Modules
//!
//! - [`decoder`] - Tolerant batch decoder: unknown or malformed entries degrade
//!   to `Unknown`, an unparsable batch decodes to `None`

pub mod decoder;
mod wire;

pub use decoder::BatchDecoder;

use thiserror::Error;

/// Reasons a single batch entry could not be decoded
///
/// These never escape the decoder; they only explain, in logs, why an entry
/// became `Unknown`.
#[derive(Debug, Error)]
pub enum EntryError {
    /// The entry is not a JSON object or has no discriminator
    #[error("Entry has no type discriminator")]
    MissingTag,

    /// The discriminator names a kind this client does not handle
    #[error("Unrecognized entry type: {0}")]
    UnrecognizedTag(String),

    /// The entry body does not match the shape of its kind
    #[error("Malformed {tag} entry: {source}")]
    Malformed {
        /// Discriminator of the entry
        tag: String,
        /// Underlying deserialization error
        source: serde_json::Error,
    },

    /// The `action` field disagrees with the discriminator
    #[error("{tag} entry carries mismatched action {action}")]
    ActionMismatch {
        /// Discriminator of the entry
        tag: String,
        /// Action found on the entry
        action: String,
    },

    /// An identifier failed domain validation
    #[error("Invalid identifier in {tag} entry: {source}")]
    InvalidId {
        /// Discriminator of the entry
        tag: String,
        /// Validation error
        source: replisync_core::domain::DomainError,
    },
}
