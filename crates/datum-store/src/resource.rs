//! The shared resource envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use datum_core::ResourceId;

/// A prior snapshot of a resource, appended on every data-changing update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The data payload as it was before the update.
    pub data: Map<String, Value>,
    /// The version the snapshot belonged to.
    pub version: u64,
    /// When that version was committed.
    pub changed: DateTime<Utc>,
}

/// The versioned envelope every persisted entity is composed of.
///
/// The store exclusively creates and mutates resources; callers never
/// construct one with a caller-supplied version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Opaque unique identifier.
    pub id: ResourceId,
    /// The domain payload.
    pub data: Map<String, Value>,
    /// Per-endpoint sync bookkeeping (last-known external key and state).
    #[serde(default)]
    pub endpoints: Map<String, Value>,
    /// Positive version counter, incremented by exactly 1 on every
    /// data-changing mutation.
    pub version: u64,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Timestamp of the last data-changing mutation.
    pub changed: DateTime<Utc>,
    /// Ordered prior snapshots, append-only.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Resource {
    /// Serialize the full document for query matching and feed delivery.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Resolve the resource as of a given version.
    ///
    /// Version `0` means "current, history stripped". A positive version
    /// reconstructs the payload from the matching history snapshot, merged
    /// over the current record's identity fields. Returns `None` when no
    /// history entry carries the requested version.
    pub fn at_version(&self, version: u64) -> Option<Resource> {
        if version == 0 || version == self.version {
            let mut current = self.clone();
            current.history.clear();
            return Some(current);
        }

        let snapshot = self.history.iter().find(|entry| entry.version == version)?;

        Some(Resource {
            id: self.id,
            data: snapshot.data.clone(),
            endpoints: self.endpoints.clone(),
            version: snapshot.version,
            created: self.created,
            changed: snapshot.changed,
            history: Vec::new(),
        })
    }
}
