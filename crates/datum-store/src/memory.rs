//! In-memory store implementation.
//!
//! Serves as the reference implementation of [`ResourceStore`] and backs the
//! engine's tests. Collections keep insertion order; the change feed is an
//! append-only event log with monotonically increasing tokens, so watchers
//! can resume from any persisted token without gaps.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};

use datum_core::{Query, ResourceId, SyncError, SyncResult};

use crate::resource::{HistoryEntry, Resource};
use crate::store::{
    resolve_offset, ChangeEvent, EventStream, OperationKind, ResourceStore, ResourceStream,
    SortSpec,
};

#[derive(Default)]
struct CollectionState {
    /// Resources in insertion order.
    resources: Vec<Resource>,
    /// Committed change events, ordered by token.
    log: Vec<ChangeEvent>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, CollectionState>,
    /// Last assigned change-feed token.
    head_token: u64,
}

impl Inner {
    fn publish(&mut self, collection: &str, operation: OperationKind, full_document: Resource) {
        self.head_token += 1;
        let event = ChangeEvent {
            token: self.head_token,
            id: full_document.id,
            operation,
            full_document,
        };
        self.collections
            .entry(collection.to_string())
            .or_default()
            .log
            .push(event);
    }
}

/// In-memory [`ResourceStore`].
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    notify: Arc<Notify>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Compare two JSON values for sorting purposes.
fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn create(
        &self,
        collection: &str,
        data: Map<String, Value>,
        endpoints: Map<String, Value>,
        simulate: bool,
    ) -> SyncResult<ResourceId> {
        let id = ResourceId::new();

        debug!(%id, collection, "add new resource");

        if simulate {
            return Ok(id);
        }

        let now = Utc::now();
        let resource = Resource {
            id,
            data,
            endpoints,
            version: 1,
            created: now,
            changed: now,
            history: Vec::new(),
        };

        {
            let mut inner = self.inner.write().await;
            inner
                .collections
                .entry(collection.to_string())
                .or_default()
                .resources
                .push(resource.clone());
            inner.publish(collection, OperationKind::Insert, resource);
        }
        self.notify.notify_waiters();

        info!(%id, collection, "created new resource");
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        resource: &Resource,
        new_data: Map<String, Value>,
        endpoints: Option<Map<String, Value>>,
        simulate: bool,
    ) -> SyncResult<bool> {
        let mut inner = self.inner.write().await;

        let conflict = SyncError::Conflict {
            id: resource.id,
            expected_version: resource.version,
        };

        let Some(state) = inner.collections.get_mut(collection) else {
            return Err(conflict);
        };
        let Some(index) = state.resources.iter().position(|r| r.id == resource.id) else {
            return Err(conflict);
        };

        // Compare-and-set on the expected prior version.
        if state.resources[index].version != resource.version {
            return Err(conflict);
        }

        if state.resources[index].data == new_data {
            debug!(id = %resource.id, version = resource.version, collection,
                "resource is already up to date");

            if let Some(endpoints) = endpoints {
                if !simulate {
                    state.resources[index].endpoints = endpoints;
                    let document = state.resources[index].clone();
                    inner.publish(collection, OperationKind::Update, document);
                    drop(inner);
                    self.notify.notify_waiters();
                }
            }
            return Ok(true);
        }

        if simulate {
            return Ok(true);
        }

        let entry = &mut state.resources[index];
        entry.history.push(HistoryEntry {
            data: std::mem::take(&mut entry.data),
            version: entry.version,
            changed: entry.changed,
        });
        entry.version += 1;
        entry.data = new_data;
        entry.changed = Utc::now();
        if let Some(endpoints) = endpoints {
            entry.endpoints = endpoints;
        }

        let document = entry.clone();
        let version = document.version;
        inner.publish(collection, OperationKind::Update, document);
        drop(inner);
        self.notify.notify_waiters();

        info!(id = %resource.id, version, collection, "updated resource");
        Ok(true)
    }

    async fn delete(&self, collection: &str, id: ResourceId, simulate: bool) -> SyncResult<bool> {
        info!(%id, collection, "delete resource");

        if simulate {
            return Ok(true);
        }

        let mut inner = self.inner.write().await;
        let Some(state) = inner.collections.get_mut(collection) else {
            return Err(SyncError::not_found(format!(
                "resource {id} not found in collection {collection}"
            )));
        };
        let Some(index) = state.resources.iter().position(|r| r.id == id) else {
            return Err(SyncError::not_found(format!(
                "resource {id} not found in collection {collection}"
            )));
        };

        let removed = state.resources.remove(index);
        inner.publish(collection, OperationKind::Delete, removed);
        drop(inner);
        self.notify.notify_waiters();

        Ok(true)
    }

    async fn count(&self, collection: &str, query: &Query) -> SyncResult<u64> {
        let inner = self.inner.read().await;
        let count = inner
            .collections
            .get(collection)
            .map(|state| {
                state
                    .resources
                    .iter()
                    .filter(|r| query.matches(&r.to_value()))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn get_one(&self, collection: &str, query: &Query, version: u64) -> SyncResult<Resource> {
        let inner = self.inner.read().await;
        let matches: Vec<&Resource> = inner
            .collections
            .get(collection)
            .map(|state| {
                state
                    .resources
                    .iter()
                    .filter(|r| query.matches(&r.to_value()))
                    .collect()
            })
            .unwrap_or_default();

        if matches.is_empty() {
            return Err(SyncError::not_found(format!(
                "resource {} not found in collection {collection}",
                query.to_value()
            )));
        }
        if matches.len() > 1 {
            return Err(SyncError::multiple_found(format!(
                "multiple resources found with filter {} in collection {collection}",
                query.to_value()
            )));
        }

        matches[0].at_version(version).ok_or_else(|| {
            SyncError::not_found(format!(
                "resource {} has no history entry for version {version}",
                matches[0].id
            ))
        })
    }

    async fn get_all(
        &self,
        collection: &str,
        query: &Query,
        offset: Option<i64>,
        limit: Option<usize>,
        sort: Option<SortSpec>,
        version: u64,
    ) -> SyncResult<ResourceStream> {
        let inner = self.inner.read().await;
        let mut matches: Vec<Resource> = inner
            .collections
            .get(collection)
            .map(|state| {
                state
                    .resources
                    .iter()
                    .filter(|r| query.matches(&r.to_value()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(inner);

        if let Some(sort) = sort {
            matches.sort_by(|a, b| {
                let left = datum_core::query::lookup(&a.to_value(), &sort.field).cloned();
                let right = datum_core::query::lookup(&b.to_value(), &sort.field).cloned();
                let ordering = match (left, right) {
                    (Some(l), Some(r)) => compare_values(&l, &r),
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                if sort.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }

        let total = matches.len() as u64;
        let skip = resolve_offset(total, offset);

        let items: Vec<(ResourceId, Resource)> = matches
            .into_iter()
            .skip(skip)
            .take(limit.unwrap_or(usize::MAX))
            .filter_map(|r| r.at_version(version).map(|resolved| (r.id, resolved)))
            .collect();

        Ok(stream::iter(items).boxed())
    }

    async fn watch(
        &self,
        collection: &str,
        resume_token: Option<u64>,
        include_existing: bool,
        query: Query,
    ) -> SyncResult<EventStream> {
        struct WatchState {
            inner: Arc<RwLock<Inner>>,
            notify: Arc<Notify>,
            collection: String,
            query: Query,
            replay: VecDeque<ChangeEvent>,
            last_token: u64,
        }

        let (replay, last_token) = {
            let inner = self.inner.read().await;
            let head = inner.head_token;
            let mut replay = VecDeque::new();

            if include_existing {
                if let Some(state) = inner.collections.get(collection) {
                    for resource in &state.resources {
                        if query.matches(&resource.to_value()) {
                            replay.push_back(ChangeEvent {
                                token: head,
                                id: resource.id,
                                operation: OperationKind::Insert,
                                full_document: resource.clone(),
                            });
                        }
                    }
                }
            }

            (replay, resume_token.unwrap_or(head))
        };

        let state = WatchState {
            inner: Arc::clone(&self.inner),
            notify: Arc::clone(&self.notify),
            collection: collection.to_string(),
            query,
            replay,
            last_token,
        };

        let stream = stream::unfold(state, |mut st| async move {
            if let Some(event) = st.replay.pop_front() {
                return Some(((event.id, event), st));
            }

            let notify = Arc::clone(&st.notify);
            loop {
                // Arm the waiter before scanning the log; a commit landing
                // between the scan and the await would otherwise be missed
                // until the next one.
                let notified = notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let next = {
                    let inner = st.inner.read().await;
                    inner.collections.get(&st.collection).and_then(|state| {
                        state
                            .log
                            .iter()
                            .find(|event| event.token > st.last_token)
                            .cloned()
                    })
                };

                match next {
                    Some(event) => {
                        st.last_token = event.token;
                        if st.query.matches(&event.full_document.to_value()) {
                            return Some(((event.id, event), st));
                        }
                    }
                    None => notified.await,
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn get_history(
        &self,
        collection: &str,
        id: ResourceId,
        filter: Option<Query>,
        offset: Option<i64>,
        limit: Option<usize>,
    ) -> SyncResult<(Vec<Resource>, u64)> {
        let inner = self.inner.read().await;
        let resource = inner
            .collections
            .get(collection)
            .and_then(|state| state.resources.iter().find(|r| r.id == id))
            .cloned()
            .ok_or_else(|| {
                SyncError::not_found(format!(
                    "resource {id} not found in collection {collection}"
                ))
            })?;
        drop(inner);

        let snapshots: Vec<Resource> = resource
            .history
            .iter()
            .filter_map(|entry| resource.at_version(entry.version))
            .filter(|snapshot| {
                filter
                    .as_ref()
                    .map(|f| f.matches(&snapshot.to_value()))
                    .unwrap_or(true)
            })
            .collect();

        let count = snapshots.len() as u64;
        let skip = resolve_offset(count, offset);

        let mut results = Vec::with_capacity(1 + snapshots.len());
        if let Some(current) = resource.at_version(0) {
            results.push(current);
        }
        results.extend(
            snapshots
                .into_iter()
                .skip(skip)
                .take(limit.unwrap_or(usize::MAX)),
        );

        Ok((results, count))
    }
}
