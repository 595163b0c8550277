//! # datum core
//!
//! Shared foundation for the datum synchronization engine: type-safe
//! identifiers, the error model with transient/permanent classification,
//! and the structured boolean query used by the resource store and the
//! endpoint connectors.
//!
//! ## Crate Organization
//!
//! - [`ids`] - Type-safe identifiers (`ResourceId`, `EndpointId`, `CycleId`)
//! - [`error`] - Error types with transient/permanent classification
//! - [`query`] - Structured boolean queries (`$and`/`$or` of field=value)

pub mod error;
pub mod ids;
pub mod query;

pub use error::{SyncError, SyncResult};
pub use ids::{CycleId, EndpointId, ResourceId};
pub use query::Query;
