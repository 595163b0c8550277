//! # datum store
//!
//! Versioned-document persistence for the synchronization engine.
//!
//! Every persisted entity shares the [`Resource`] envelope: an opaque id,
//! the domain payload under `data`, per-endpoint sync bookkeeping under
//! `endpoints`, a version counter starting at 1, timestamps and an
//! append-only history of prior snapshots. The store is the single writer
//! of authoritative resource state; concurrent updates to the same resource
//! are serialized through an atomic compare-and-set on the expected version.
//!
//! ## Key Components
//!
//! - [`Resource`] - the shared versioned envelope
//! - [`ResourceStore`] - the persistence contract (create/update/delete,
//!   filtered pagination, resumable change feed, history retrieval)
//! - [`MemoryStore`] - in-memory implementation used by the engine and in
//!   tests; durable backends plug in behind the same trait
//!
//! ## Change feed
//!
//! [`ResourceStore::watch`] yields an infinite ordered stream of
//! [`ChangeEvent`]s. Consumers persist the event's `token` and resupply it
//! to resume without gaps (at-least-once). With `include_existing`, every
//! currently-matching resource is first replayed as a synthetic `insert`.

pub mod memory;
pub mod resource;
pub mod store;

pub use memory::MemoryStore;
pub use resource::{HistoryEntry, Resource};
pub use store::{
    resolve_offset, ChangeEvent, EventStream, OperationKind, ResourceStore, ResourceStream,
    SortSpec,
};
