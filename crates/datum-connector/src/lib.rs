//! # datum connector
//!
//! The endpoint adapter contract: the uniform interface every connector
//! implements so the synchronization orchestrator can drive heterogeneous
//! back ends identically.
//!
//! ## Key Components
//!
//! - [`EndpointAdapter`] - the connector contract (cycle brackets, filtered
//!   reads, query translation, diff translation, create/update/disable/
//!   delete with simulate support)
//! - [`EndpointConfig`] / [`EndpointKind`] - admission-validated endpoint
//!   configuration over a closed kind registry
//! - [`AttributeDiff`] / [`DiffEntry`] - engine-level and connector-level
//!   change representations
//! - [`MemoryEndpoint`] - in-memory adapter used by orchestrator tests and
//!   local pipelines
//!
//! Connectors with composite identity semantics (several native entities
//! per engine object) keep their sub-operation sequencing behind `create`
//! and `delete`; query failures mid-sequence surface as `Ok(None)` /
//! `Ok(false)` so a single bad object never aborts a cycle.

pub mod diff;
pub mod memory;
pub mod object;
pub mod traits;
pub mod types;

pub use diff::{AttributeDiff, DiffAction, DiffEntry};
pub use memory::MemoryEndpoint;
pub use object::EndpointObject;
pub use traits::{EndpointAdapter, ObjectStream, TransformedQuery};
pub use types::{EndpointConfig, EndpointKind, EndpointType};

// Re-export async_trait for adapter implementors
pub use async_trait::async_trait;
