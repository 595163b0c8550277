//! DataType: one named synchronization pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use datum_core::{SyncError, SyncResult};

use crate::map::AttributeType;
use crate::workflow::{Workflow, WorkflowDefinition};

/// Schema constraints for one field of a DataType's objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "type")]
    pub field_type: Option<AttributeType>,
}

/// Declarative DataType configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataTypeDefinition {
    pub name: String,
    /// Store collection holding this DataType's objects.
    pub collection: String,
    /// Field name to constraint; objects are validated on every admission.
    #[serde(default)]
    pub schema: Map<String, Value>,
    /// Ordered workflows; order is significant and total.
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

/// A validated synchronization pipeline.
#[derive(Debug, Clone)]
pub struct DataType {
    pub name: String,
    pub collection: String,
    schema: Vec<(String, FieldSpec)>,
    pub workflows: Vec<Workflow>,
}

impl DataType {
    pub fn from_definition(definition: DataTypeDefinition) -> SyncResult<Self> {
        let mut schema = Vec::with_capacity(definition.schema.len());
        for (field, spec) in &definition.schema {
            let spec: FieldSpec = serde_json::from_value(spec.clone()).map_err(|err| {
                SyncError::validation(format!(
                    "datatype [{}] schema field [{field}]: {err}",
                    definition.name
                ))
            })?;
            schema.push((field.clone(), spec));
        }

        let workflows = definition
            .workflows
            .into_iter()
            .map(Workflow::from_definition)
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(Self {
            name: definition.name,
            collection: definition.collection,
            schema,
            workflows,
        })
    }

    pub fn from_value(value: &Value) -> SyncResult<Self> {
        let definition: DataTypeDefinition = serde_json::from_value(value.clone())
            .map_err(|err| SyncError::validation(format!("datatype: {err}")))?;
        Self::from_definition(definition)
    }

    /// Validate an object's data against the schema.
    pub fn validate(&self, data: &Map<String, Value>) -> SyncResult<()> {
        for (field, spec) in &self.schema {
            match data.get(field) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(SyncError::validation(format!(
                            "datatype [{}]: required field [{field}] is missing",
                            self.name
                        )));
                    }
                }
                Some(value) => {
                    if let Some(expected) = spec.field_type {
                        let ok = match expected {
                            AttributeType::String => value.is_string(),
                            AttributeType::Int => value.is_i64() || value.is_u64(),
                            AttributeType::Bool => value.is_boolean(),
                            AttributeType::Array => value.is_array(),
                        };
                        if !ok {
                            return Err(SyncError::validation(format!(
                                "datatype [{}]: field [{field}] must be of type {expected:?}",
                                self.name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    fn datatype() -> DataType {
        DataType::from_value(&json!({
            "name": "accounts",
            "collection": "accounts",
            "schema": {
                "username": {"required": true, "type": "string"},
                "level": {"type": "int"},
            },
            "workflows": [{"name": "default"}],
        }))
        .expect("valid datatype")
    }

    #[test]
    fn test_schema_accepts_valid_data() {
        datatype()
            .validate(&object(json!({"username": "jdoe", "level": 3})))
            .unwrap();
    }

    #[test]
    fn test_schema_rejects_missing_required_field() {
        let err = datatype()
            .validate(&object(json!({"level": 3})))
            .unwrap_err();
        assert!(err.to_string().contains("username"));
    }

    #[test]
    fn test_schema_rejects_wrong_type() {
        let err = datatype()
            .validate(&object(json!({"username": "jdoe", "level": "three"})))
            .unwrap_err();
        assert!(err.to_string().contains("level"));
    }

    #[test]
    fn test_unknown_configuration_keys_rejected() {
        assert!(DataType::from_value(&json!({
            "name": "x",
            "collection": "x",
            "parallelism": 4,
        }))
        .is_err());
    }

    #[test]
    fn test_invalid_schema_spec_names_field() {
        let err = DataType::from_value(&json!({
            "name": "accounts",
            "collection": "accounts",
            "schema": {"username": {"mandatory": true}},
        }))
        .unwrap_err();
        assert!(err.to_string().contains("username"));
    }
}
