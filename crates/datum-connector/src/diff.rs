//! Attribute-level change representations.
//!
//! The mapping engine computes an ordered attribute diff against the
//! destination object; each connector translates it into its own ordered
//! change list through [`crate::traits::EndpointAdapter::get_diff`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single desired change to one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "action", content = "value")]
pub enum DiffAction {
    /// Set the attribute to the given value (create or overwrite).
    Set(Value),
    /// Actively remove the attribute from the destination.
    Unset,
}

/// Ordered engine-level diff: attribute name to desired change, in
/// attribute-map declaration order.
pub type AttributeDiff = Vec<(String, DiffAction)>;

/// One entry of a connector's translated change list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// The attribute the change applies to.
    pub attribute: String,
    /// The change, in engine-level terms; connectors interpret it
    /// natively when applying.
    pub data: DiffAction,
}

impl DiffEntry {
    pub fn set(attribute: impl Into<String>, value: Value) -> Self {
        Self {
            attribute: attribute.into(),
            data: DiffAction::Set(value),
        }
    }

    pub fn unset(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            data: DiffAction::Unset,
        }
    }
}
