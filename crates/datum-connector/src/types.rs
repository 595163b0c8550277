//! Endpoint kinds, roles and configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use datum_core::{EndpointId, SyncError, SyncResult};

/// The role an endpoint plays in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    /// Objects are read from this endpoint.
    Source,
    /// Objects are reconciled into this endpoint.
    Destination,
}

impl std::fmt::Display for EndpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointType::Source => write!(f, "source"),
            EndpointType::Destination => write!(f, "destination"),
        }
    }
}

/// The closed set of known connector kinds.
///
/// Configuration naming an unknown kind is rejected at validation time,
/// not at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// In-memory endpoint, used for tests and local pipelines.
    Memory,
    /// Relational directory with composite login/account identity.
    SqlUsers,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::Memory => write!(f, "memory"),
            EndpointKind::SqlUsers => write!(f, "sql_users"),
        }
    }
}

impl std::str::FromStr for EndpointKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(EndpointKind::Memory),
            "sql_users" => Ok(EndpointKind::SqlUsers),
            other => Err(SyncError::validation(format!(
                "unknown endpoint kind [{other}]"
            ))),
        }
    }
}

/// Declarative endpoint configuration.
///
/// Validated at admission; unknown keys are rejected by the deserializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Stable endpoint id; generated at admission when the configuration
    /// does not carry one.
    #[serde(default)]
    pub id: EndpointId,
    /// Unique endpoint name within its pipeline.
    pub name: String,
    /// Connector kind.
    pub kind: EndpointKind,
    /// Source or destination role.
    #[serde(rename = "type")]
    pub endpoint_type: EndpointType,
    /// Attribute used to correlate engine objects with endpoint objects.
    pub identifier: String,
    /// Connector-specific options, validated by the connector itself.
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl EndpointConfig {
    /// Validate the non-connector-specific parts of the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.name.is_empty() {
            return Err(SyncError::validation("endpoint name must not be empty"));
        }
        if self.identifier.is_empty() {
            return Err(SyncError::validation(format!(
                "endpoint [{}] requires a correlation identifier",
                self.name
            )));
        }
        Ok(())
    }
}
