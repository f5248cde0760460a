//! Domain entities and value types
//!
//! - Newtypes for validated identifiers and the composite [`EntityKey`]
//! - Stream configuration and the reset target rules per stream kind
//! - The event model: raw decoded events, reconciled events and entity value objects
//! - Domain-specific error types

pub mod errors;
pub mod event;
pub mod newtypes;
pub mod stream;

pub use errors::DomainError;
pub use event::{
    Action, ActionGroup, DecodedBatch, DeleteEvent, DeleteTarget, EntityEvent, EntityKind, EntityVO,
    EventKind, LinkRecord, LinkState, RawEvent, ReconciledEvent,
};
pub use newtypes::*;
pub use stream::{StreamConfig, StreamKind};
