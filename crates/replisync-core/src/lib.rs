//! Replisync Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core of the metadata
//! synchronization engine:
//! - **Domain types** - `StreamConfig`, `EntityKey`, `RawEvent`, `ReconciledEvent`, `EntityVO`
//! - **Port definitions** - Traits for adapters: `IReplicaStore`, `IContainerDirectory`,
//!   `ICursorStore`, `IEventSource`
//! - **Configuration** - YAML configuration with validation and a builder
//!
//! # Architecture
//!
//! The domain module holds pure value types with no I/O. Ports define the
//! trait interfaces the engine drives; the storage and transport adapters
//! implement them in their own crates.

pub mod config;
pub mod domain;
pub mod ports;
