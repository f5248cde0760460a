//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the synchronization engine drives; their
//! implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IReplicaStore`] - Batched apply operations against the local replica
//! - [`IContainerDirectory`] - Default-container lookup used to resolve missing context
//! - [`ICursorStore`] - Persistence of per-stream cursors
//! - [`IEventSource`] - Fetching raw change-feed batches

pub mod cursor_store;
pub mod event_source;
pub mod replica_store;

pub use cursor_store::ICursorStore;
pub use event_source::IEventSource;
pub use replica_store::{ApplyUnit, IContainerDirectory, IReplicaStore};
