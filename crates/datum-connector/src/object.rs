//! The endpoint object envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single object as seen by an endpoint: the raw attribute payload,
/// independent of the engine's versioned envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointObject {
    /// Attribute name to value.
    pub data: Map<String, Value>,
}

impl EndpointObject {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// Look up a single attribute.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.data.get(attribute)
    }

    /// The payload as a JSON value, for query matching.
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

impl From<Map<String, Value>> for EndpointObject {
    fn from(data: Map<String, Value>) -> Self {
        Self { data }
    }
}
