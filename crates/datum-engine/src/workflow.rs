//! Workflow selection.
//!
//! A DataType carries an ordered list of workflows; per object, per cycle,
//! the first workflow whose condition matches governs the object
//! exclusively. No match means the object is skipped without error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use datum_core::{SyncError, SyncResult};

use crate::map::AttributeMap;
use crate::script::ScriptEngine;

/// The lifecycle action a workflow applies at the destinations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowEnsure {
    /// Create the destination object only if it does not exist yet.
    Exists,
    /// Create if absent, otherwise converge to the latest mapped value.
    #[default]
    Last,
    /// Apply the mapped attributes and flag the object inactive.
    Disabled,
    /// Delete the destination object if present.
    Absent,
}

/// Declarative workflow configuration, validated at admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub ensure: WorkflowEnsure,
    /// Boolean expression over the candidate object; empty always matches.
    #[serde(default)]
    pub condition: String,
    /// The attribute map, as a JSON object of attribute rules.
    #[serde(default = "empty_map")]
    pub map: Value,
}

fn empty_map() -> Value {
    Value::Object(Map::new())
}

/// A validated workflow.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub ensure: WorkflowEnsure,
    pub condition: String,
    pub map: AttributeMap,
}

impl Workflow {
    pub fn from_definition(definition: WorkflowDefinition) -> SyncResult<Self> {
        let map = AttributeMap::from_value(&definition.map).map_err(|err| {
            SyncError::validation(format!("workflow [{}]: {err}", definition.name))
        })?;

        Ok(Self {
            name: definition.name,
            ensure: definition.ensure,
            condition: definition.condition,
            map,
        })
    }

    pub fn from_value(value: &Value) -> SyncResult<Self> {
        let definition: WorkflowDefinition = serde_json::from_value(value.clone())
            .map_err(|err| SyncError::validation(format!("workflow: {err}")))?;
        Self::from_definition(definition)
    }

    /// Evaluate this workflow's condition against an object.
    ///
    /// A failing condition counts as a non-match and is logged; a broken
    /// expression on one workflow must not take the whole cycle down.
    pub fn matches(&self, object: &Map<String, Value>, scripts: &ScriptEngine) -> bool {
        if self.condition.trim().is_empty() {
            return true;
        }

        match scripts.eval_condition(&self.condition, object) {
            Ok(matched) => matched,
            Err(err) => {
                warn!(workflow = %self.name, error = %err,
                    "condition evaluation failed, treating as non-match");
                false
            }
        }
    }
}

/// Select the first matching workflow in declared order.
pub fn select_workflow<'a>(
    workflows: &'a [Workflow],
    object: &Map<String, Value>,
    scripts: &ScriptEngine,
) -> Option<&'a Workflow> {
    workflows
        .iter()
        .find(|workflow| workflow.matches(object, scripts))
}
