//! # datum engine
//!
//! The synchronization core: declarative DataTypes admit objects into
//! named pipelines, workflows decide per object what should happen, the
//! attribute map shapes source records into destination records and the
//! orchestrator drives full cycles across endpoints while the store keeps
//! the authoritative versioned state.
//!
//! ## Key Components
//!
//! - [`DataType`] - one named pipeline: store collection, admission schema
//!   and an ordered workflow list
//! - [`Workflow`] - condition plus attribute map plus lifecycle `ensure`;
//!   first match in declared order governs an object exclusively
//! - [`AttributeMap`] - the declarative transformation language (value,
//!   script, from, rewrite, unwind, relations, type coercion, per-attribute
//!   ensure)
//! - [`ScriptEngine`] - sandboxed rhai evaluation for `script` expressions
//!   and workflow conditions
//! - [`SyncOrchestrator`] - cycle driver with per-object failure isolation,
//!   simulate propagation and cooperative cancellation
//!
//! ## Cycle anatomy
//!
//! A cycle brackets every endpoint with `setup`/`shutdown`, streams the
//! source's objects and per object: validates against the DataType schema,
//! selects a workflow, resolves the attribute map, reconciles each
//! destination and persists the authoritative record with per-endpoint
//! bookkeeping. One object's failure is recorded in the [`CycleSummary`]
//! and the cycle moves on.

pub mod datatype;
pub mod map;
pub mod orchestrator;
pub mod script;
pub mod workflow;

pub use datatype::{DataType, DataTypeDefinition, FieldSpec};
pub use map::{
    AttributeDefinition, AttributeEnsure, AttributeMap, AttributeType, MapRelation, NoRelations,
    RelationResolver, RewriteRule, Unwind, UnwindMode,
};
pub use orchestrator::{CycleOptions, CycleSummary, ObjectFailure, SyncOrchestrator};
pub use script::{ScriptEngine, ScriptEngineConfig};
pub use workflow::{select_workflow, Workflow, WorkflowDefinition, WorkflowEnsure};
