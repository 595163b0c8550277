//! The persistence contract.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use datum_core::{Query, ResourceId, SyncResult};

use crate::resource::Resource;

/// The kind of mutation a change-feed event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A resource was created (also used for synthetic replay of existing
    /// resources when a watcher asks for them).
    Insert,
    /// A resource's data or bookkeeping changed.
    Update,
    /// A resource was replaced wholesale.
    Replace,
    /// A resource was removed.
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Insert => write!(f, "insert"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Replace => write!(f, "replace"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// One committed mutation, delivered in commit order per resource id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Resumable position token. Persist it and resupply it to
    /// [`ResourceStore::watch`] to resume without gaps.
    pub token: u64,
    /// The mutated resource's id.
    pub id: ResourceId,
    /// What happened.
    pub operation: OperationKind,
    /// The full document after the mutation (before, for deletes).
    pub full_document: Resource,
}

/// Sort order for bounded scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSpec {
    /// Field to sort by, dot notation allowed.
    pub field: String,
    /// Ascending when true.
    pub ascending: bool,
}

impl SortSpec {
    /// Sort ascending by a field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    /// Sort descending by a field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// A finite, restartable scan result stream.
pub type ResourceStream = BoxStream<'static, (ResourceId, Resource)>;

/// An infinite change-feed stream. Not restartable past consumption;
/// resume through the event tokens instead.
pub type EventStream = BoxStream<'static, (ResourceId, ChangeEvent)>;

/// Resolve a possibly-negative offset against the total matching count.
///
/// A negative offset means "from the end": with `total == 0` the offset is
/// ignored; when its magnitude fits into `total` it resolves to
/// `total + offset`; otherwise it clamps to the start.
pub fn resolve_offset(total: u64, offset: Option<i64>) -> usize {
    let Some(offset) = offset else {
        return 0;
    };

    if total == 0 {
        return 0;
    }

    if offset >= 0 {
        return offset as usize;
    }

    if offset.unsigned_abs() <= total {
        (total as i64 + offset) as usize
    } else {
        0
    }
}

/// Versioned-document persistence.
///
/// Implementations must provide atomic compare-and-set updates keyed on the
/// expected prior version, a durable ordered change feed and a count
/// capability. All mutating operations honor `simulate`: a dry run performs
/// no persistence while still returning plausible results.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create a resource, stamping `created = changed = now` and
    /// `version = 1`. Under `simulate` nothing is persisted and a
    /// synthetically generated id is returned.
    async fn create(
        &self,
        collection: &str,
        data: Map<String, Value>,
        endpoints: Map<String, Value>,
        simulate: bool,
    ) -> SyncResult<ResourceId>;

    /// Update a resource atomically against its expected version.
    ///
    /// When `new_data` deep-equals the current data only bookkeeping is
    /// refreshed; the version is not incremented and no history entry is
    /// appended. Fails with [`datum_core::SyncError::Conflict`] when the
    /// resource was deleted or already advanced past `resource.version`.
    async fn update(
        &self,
        collection: &str,
        resource: &Resource,
        new_data: Map<String, Value>,
        endpoints: Option<Map<String, Value>>,
        simulate: bool,
    ) -> SyncResult<bool>;

    /// Remove a resource. A `simulate` delete is a no-op returning true.
    async fn delete(&self, collection: &str, id: ResourceId, simulate: bool) -> SyncResult<bool>;

    /// Count resources matching the query.
    async fn count(&self, collection: &str, query: &Query) -> SyncResult<u64>;

    /// Fetch exactly one resource matching the query.
    ///
    /// Fails with `NotFound` on zero matches and `MultipleFound` when the
    /// filter is ambiguous. `version` selects a past version: `0` is the
    /// current record with history stripped, `N > 0` reconstructs the data
    /// as of history entry `N`.
    async fn get_one(&self, collection: &str, query: &Query, version: u64) -> SyncResult<Resource>;

    /// Scan resources matching the query, bounded by offset/limit.
    ///
    /// `offset` may be negative, meaning "from the end" (see
    /// [`resolve_offset`]). The returned stream is finite and the scan can
    /// be restarted by calling again. `version` behaves as in
    /// [`ResourceStore::get_one`]; resources without the requested version
    /// are skipped.
    async fn get_all(
        &self,
        collection: &str,
        query: &Query,
        offset: Option<i64>,
        limit: Option<usize>,
        sort: Option<SortSpec>,
        version: u64,
    ) -> SyncResult<ResourceStream>;

    /// Follow the collection's change feed.
    ///
    /// With `include_existing`, every currently-matching resource is first
    /// yielded as a synthetic insert; live events matching the query follow
    /// in arrival order, starting after `resume_token`. The stream never
    /// ends.
    async fn watch(
        &self,
        collection: &str,
        resume_token: Option<u64>,
        include_existing: bool,
        query: Query,
    ) -> SyncResult<EventStream>;

    /// Retrieve a resource's history: the current record first, followed by
    /// matching history snapshots (newest last), plus the count of history
    /// entries matching the optional filter.
    async fn get_history(
        &self,
        collection: &str,
        id: ResourceId,
        filter: Option<Query>,
        offset: Option<i64>,
        limit: Option<usize>,
    ) -> SyncResult<(Vec<Resource>, u64)>;
}
