//! The synchronization cycle driver.
//!
//! One cycle covers one DataType: bracket all endpoints with
//! `setup`/`shutdown`, stream the source's objects, and per object select
//! the governing workflow, resolve the attribute map, reconcile every
//! destination and persist the authoritative record. A failure on one
//! object is recorded and the cycle moves on; only a failing `setup` is
//! cycle-fatal. `simulate` propagates through the store and every
//! endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use datum_connector::{EndpointAdapter, EndpointObject};
use datum_core::{CycleId, Query, SyncError, SyncResult};
use datum_store::{resolve_offset, Resource, ResourceStore};

use crate::datatype::DataType;
use crate::map::RelationResolver;
use crate::script::ScriptEngine;
use crate::workflow::{select_workflow, Workflow, WorkflowEnsure};

/// Options for one cycle run.
#[derive(Debug, Clone, Default)]
pub struct CycleOptions {
    /// Dry run: all reads and diffs, no external or persisted mutation.
    pub simulate: bool,
    /// Offset into the source stream; negative counts from the end.
    pub offset: Option<i64>,
    /// Bound on the number of source objects processed.
    pub limit: Option<usize>,
}

/// What happened to one object during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectOutcome {
    Created,
    Updated,
    Deleted,
    Skipped,
}

/// A recorded per-object failure, retrievable for operator inspection.
#[derive(Debug, Clone)]
pub struct ObjectFailure {
    /// The object's source identifier value.
    pub identifier: String,
    pub error: String,
}

/// Counts and failures for one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub cycle: CycleId,
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failures: Vec<ObjectFailure>,
}

impl CycleSummary {
    fn new(cycle: CycleId) -> Self {
        Self {
            cycle,
            created: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, outcome: ObjectOutcome) {
        match outcome {
            ObjectOutcome::Created => self.created += 1,
            ObjectOutcome::Updated => self.updated += 1,
            ObjectOutcome::Deleted => self.deleted += 1,
            ObjectOutcome::Skipped => self.skipped += 1,
        }
    }

    fn record_failure(&mut self, identifier: String, error: &SyncError) {
        self.failed += 1;
        self.failures.push(ObjectFailure {
            identifier,
            error: error.to_string(),
        });
    }

    /// The recorded failure for one source identifier, if any.
    pub fn failure_for(&self, identifier: &str) -> Option<&ObjectFailure> {
        self.failures.iter().find(|f| f.identifier == identifier)
    }
}

/// Resolves nested `map` relations against the authoritative store.
struct StoreRelations<'a> {
    store: &'a dyn ResourceStore,
}

#[async_trait]
impl RelationResolver for StoreRelations<'_> {
    async fn resolve(
        &self,
        collection: &str,
        key: &Value,
        to: &str,
    ) -> SyncResult<Option<Value>> {
        let key = value_to_string(key);
        match self.store.get_one(collection, &Query::eq("id", key), 0).await {
            Ok(resource) => Ok(resource.data.get(to).cloned()),
            Err(SyncError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Drives synchronization cycles against a [`ResourceStore`].
pub struct SyncOrchestrator {
    store: Arc<dyn ResourceStore>,
    scripts: ScriptEngine,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            scripts: ScriptEngine::new(),
        }
    }

    /// Run one cycle for one DataType.
    ///
    /// Committed progress stands when the token cancels mid-cycle; the
    /// check sits at the top of the per-object loop so no object is left
    /// half-applied.
    #[instrument(skip_all, fields(datatype = %datatype.name, simulate = options.simulate))]
    pub async fn run_cycle(
        &self,
        datatype: &DataType,
        source: Arc<dyn EndpointAdapter>,
        destinations: &[Arc<dyn EndpointAdapter>],
        options: &CycleOptions,
        cancel: &CancellationToken,
    ) -> SyncResult<CycleSummary> {
        let mut summary = CycleSummary::new(CycleId::new());
        info!(cycle = %summary.cycle, "starting sync cycle");

        // Setup failures are cycle-fatal; endpoints already opened are
        // released before bailing out.
        let mut ready: Vec<&Arc<dyn EndpointAdapter>> = Vec::new();
        for endpoint in std::iter::once(&source).chain(destinations.iter()) {
            if let Err(err) = endpoint.setup(options.simulate).await {
                warn!(endpoint = endpoint.name(), error = %err, "endpoint setup failed");
                for open in &ready {
                    if let Err(err) = open.shutdown(options.simulate).await {
                        warn!(endpoint = open.name(), error = %err, "endpoint shutdown failed");
                    }
                }
                return Err(err);
            }
            ready.push(endpoint);
        }

        let result = self
            .drive(datatype, &source, destinations, options, cancel, &mut summary)
            .await;

        for endpoint in ready {
            if let Err(err) = endpoint.shutdown(options.simulate).await {
                warn!(endpoint = endpoint.name(), error = %err, "endpoint shutdown failed");
            }
        }

        result?;

        info!(
            cycle = %summary.cycle,
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            skipped = summary.skipped,
            failed = summary.failed,
            "sync cycle finished"
        );
        Ok(summary)
    }

    async fn drive(
        &self,
        datatype: &DataType,
        source: &Arc<dyn EndpointAdapter>,
        destinations: &[Arc<dyn EndpointAdapter>],
        options: &CycleOptions,
        cancel: &CancellationToken,
        summary: &mut CycleSummary,
    ) -> SyncResult<()> {
        let mut stream = source.get_all(&Query::empty()).await?;
        let mut objects = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(object) => objects.push(object),
                Err(err) => summary.record_failure(String::new(), &err),
            }
        }

        let skip = resolve_offset(objects.len() as u64, options.offset);
        let bounded = objects
            .into_iter()
            .skip(skip)
            .take(options.limit.unwrap_or(usize::MAX));

        for object in bounded {
            if cancel.is_cancelled() {
                info!(cycle = %summary.cycle, "cycle cancelled, committed progress stands");
                break;
            }

            let identifier = object
                .get(source.identifier())
                .map(value_to_string)
                .unwrap_or_default();

            match self
                .process_object(datatype, source, &object, destinations, options)
                .await
            {
                Ok(outcome) => summary.record(outcome),
                Err(err) => {
                    warn!(identifier, error = %err, "object failed, continuing cycle");
                    summary.record_failure(identifier, &err);
                }
            }
        }

        Ok(())
    }

    async fn process_object(
        &self,
        datatype: &DataType,
        source: &Arc<dyn EndpointAdapter>,
        object: &EndpointObject,
        destinations: &[Arc<dyn EndpointAdapter>],
        options: &CycleOptions,
    ) -> SyncResult<ObjectOutcome> {
        datatype.validate(&object.data)?;

        let Some(workflow) = select_workflow(&datatype.workflows, &object.data, &self.scripts)
        else {
            debug!("no workflow matched, skipping object");
            return Ok(ObjectOutcome::Skipped);
        };

        let relations = StoreRelations {
            store: self.store.as_ref(),
        };
        let mapped = workflow
            .map
            .resolve(&object.data, &self.scripts, &relations)
            .await?;

        // Correlate with the authoritative record through the source's
        // identifier attribute.
        let key_attribute = source.identifier();
        let key = object.get(key_attribute).cloned().ok_or_else(|| {
            SyncError::validation(format!(
                "source object carries no identifier attribute [{key_attribute}]"
            ))
        })?;
        let store_query = Query::eq(format!("data.{key_attribute}"), key);
        let existing = match self
            .store
            .get_one(&datatype.collection, &store_query, 0)
            .await
        {
            Ok(resource) => Some(resource),
            Err(SyncError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };

        let mut endpoints = existing
            .as_ref()
            .map(|resource| resource.endpoints.clone())
            .unwrap_or_default();
        let mut destination_changed = false;

        for destination in destinations {
            let changed = self
                .apply_destination(workflow, &mapped, destination.as_ref(), options)
                .await?;
            destination_changed |= changed;

            if workflow.ensure == WorkflowEnsure::Absent {
                endpoints.remove(destination.name());
            } else {
                endpoints.insert(
                    destination.name().to_string(),
                    json!({
                        "key": mapped.get(destination.identifier()),
                        "last_sync": Utc::now().to_rfc3339(),
                    }),
                );
            }
        }

        if workflow.ensure == WorkflowEnsure::Absent {
            return match existing {
                Some(resource) => {
                    self.store
                        .delete(&datatype.collection, resource.id, options.simulate)
                        .await?;
                    Ok(ObjectOutcome::Deleted)
                }
                None if destination_changed => Ok(ObjectOutcome::Deleted),
                None => Ok(ObjectOutcome::Skipped),
            };
        }

        match existing {
            None => {
                self.store
                    .create(
                        &datatype.collection,
                        object.data.clone(),
                        endpoints,
                        options.simulate,
                    )
                    .await?;
                Ok(ObjectOutcome::Created)
            }
            Some(resource) => {
                let data_changed = resource.data != object.data;
                self.update_resource(datatype, &resource, object, endpoints, options)
                    .await?;
                if data_changed || destination_changed {
                    Ok(ObjectOutcome::Updated)
                } else {
                    Ok(ObjectOutcome::Skipped)
                }
            }
        }
    }

    /// Persist the authoritative record, retrying a lost version race
    /// exactly once after a re-read.
    async fn update_resource(
        &self,
        datatype: &DataType,
        resource: &Resource,
        object: &EndpointObject,
        endpoints: Map<String, Value>,
        options: &CycleOptions,
    ) -> SyncResult<()> {
        let result = self
            .store
            .update(
                &datatype.collection,
                resource,
                object.data.clone(),
                Some(endpoints.clone()),
                options.simulate,
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(SyncError::Conflict { id, .. }) => {
                warn!(%id, "version race lost, re-reading and retrying once");
                let fresh = self
                    .store
                    .get_one(&datatype.collection, &Query::eq("id", id.to_string()), 0)
                    .await?;
                self.store
                    .update(
                        &datatype.collection,
                        &fresh,
                        object.data.clone(),
                        Some(endpoints),
                        options.simulate,
                    )
                    .await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Reconcile one destination; returns whether an external mutation
    /// was issued.
    async fn apply_destination(
        &self,
        workflow: &Workflow,
        mapped: &Map<String, Value>,
        destination: &dyn EndpointAdapter,
        options: &CycleOptions,
    ) -> SyncResult<bool> {
        let key_attribute = destination.identifier();
        let key = mapped.get(key_attribute).cloned().ok_or_else(|| {
            SyncError::validation(format!(
                "mapped record carries no identifier attribute [{key_attribute}] for endpoint [{}]",
                destination.name()
            ))
        })?;
        let query = Query::eq(key_attribute, key);

        let current = match destination.get_one(&query).await {
            Ok(object) => Some(object),
            Err(SyncError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };

        match (workflow.ensure, current) {
            (WorkflowEnsure::Exists, Some(_)) => Ok(false),

            (WorkflowEnsure::Exists, None) | (WorkflowEnsure::Last, None) => {
                destination
                    .create(&EndpointObject::new(mapped.clone()), options.simulate)
                    .await?;
                Ok(true)
            }

            (WorkflowEnsure::Last, Some(current)) => {
                let diff = workflow.map.diff(mapped, &current.data);
                let entries = destination.get_diff(&diff)?;
                if entries.is_empty() {
                    Ok(false)
                } else {
                    destination.update(&query, entries, options.simulate).await?;
                    Ok(true)
                }
            }

            (WorkflowEnsure::Disabled, None) => {
                destination
                    .create(&EndpointObject::new(mapped.clone()), options.simulate)
                    .await?;
                destination.disable(&query, options.simulate).await?;
                Ok(true)
            }

            (WorkflowEnsure::Disabled, Some(current)) => {
                let diff = workflow.map.diff(mapped, &current.data);
                let entries = destination.get_diff(&diff)?;
                let mut changed = false;
                if !entries.is_empty() {
                    destination.update(&query, entries, options.simulate).await?;
                    changed = true;
                }
                if current.get("disabled").and_then(Value::as_bool) != Some(true) {
                    destination.disable(&query, options.simulate).await?;
                    changed = true;
                }
                Ok(changed)
            }

            (WorkflowEnsure::Absent, Some(current)) => {
                destination.delete(&query, &current, options.simulate).await
            }
            (WorkflowEnsure::Absent, None) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use datum_connector::{DiffEntry, EndpointConfig, EndpointKind, EndpointType, MemoryEndpoint, ObjectStream};
    use datum_core::ResourceId;
    use datum_store::{EventStream, MemoryStore, ResourceStream, SortSpec};

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    fn endpoint(name: &str, endpoint_type: &str, identifier: &str) -> MemoryEndpoint {
        let config: EndpointConfig = serde_json::from_value(json!({
            "name": name,
            "kind": "memory",
            "type": endpoint_type,
            "identifier": identifier,
        }))
        .unwrap();
        MemoryEndpoint::new(config).unwrap()
    }

    async fn source_with(objects: Vec<Value>) -> MemoryEndpoint {
        let source = endpoint("hr", "source", "uid");
        source.seed(objects.into_iter().map(object).collect()).await;
        source
    }

    fn datatype(workflows: Value) -> DataType {
        DataType::from_value(&json!({
            "name": "accounts",
            "collection": "accounts",
            "schema": {"uid": {"required": true, "type": "string"}},
            "workflows": workflows,
        }))
        .unwrap()
    }

    fn default_datatype() -> DataType {
        datatype(json!([{
            "name": "default",
            "map": {"username": {"from": "uid"}, "mail": {}},
        }]))
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        orchestrator: SyncOrchestrator,
        destination: MemoryEndpoint,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        Fixture {
            store: store.clone(),
            orchestrator: SyncOrchestrator::new(store),
            destination: endpoint("dir", "destination", "username"),
        }
    }

    async fn run(
        fx: &Fixture,
        datatype: &DataType,
        source: MemoryEndpoint,
        options: &CycleOptions,
    ) -> CycleSummary {
        fx.orchestrator
            .run_cycle(
                datatype,
                Arc::new(source),
                &[Arc::new(fx.destination.clone())],
                options,
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_cycle_creates_resources_and_destination_objects() {
        let fx = fixture();
        let source = source_with(vec![
            json!({"uid": "a", "mail": "a@x"}),
            json!({"uid": "b", "mail": "b@x"}),
        ])
        .await;

        let summary = run(&fx, &default_datatype(), source, &CycleOptions::default()).await;
        assert_eq!(summary.created, 2);
        assert_eq!(summary.failed, 0);

        assert_eq!(fx.store.count("accounts", &Query::empty()).await.unwrap(), 2);
        let resource = fx
            .store
            .get_one("accounts", &Query::eq("data.uid", "a"), 0)
            .await
            .unwrap();
        assert_eq!(resource.data["mail"], json!("a@x"));
        let bookkeeping = resource.endpoints["dir"].as_object().unwrap();
        assert_eq!(bookkeeping["key"], json!("a"));
        assert!(bookkeeping.contains_key("last_sync"));

        let objects = fx.destination.objects().await;
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["username"], json!("a"));
        assert_eq!(objects[1]["mail"], json!("b@x"));
    }

    #[tokio::test]
    async fn test_second_cycle_is_idempotent() {
        let fx = fixture();
        let datatype = default_datatype();
        let source = source_with(vec![json!({"uid": "a", "mail": "a@x"})]).await;

        run(&fx, &datatype, source.clone(), &CycleOptions::default()).await;
        let summary = run(&fx, &datatype, source, &CycleOptions::default()).await;

        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped, 1);
        let resource = fx
            .store
            .get_one("accounts", &Query::eq("data.uid", "a"), 0)
            .await
            .unwrap();
        assert_eq!(resource.version, 1);
        assert_eq!(fx.destination.objects().await.len(), 1);
    }

    #[tokio::test]
    async fn test_source_change_propagates() {
        let fx = fixture();
        let datatype = default_datatype();
        let source = source_with(vec![
            json!({"uid": "a", "mail": "a@x"}),
            json!({"uid": "b", "mail": "b@x"}),
        ])
        .await;

        run(&fx, &datatype, source.clone(), &CycleOptions::default()).await;
        source
            .update(
                &Query::eq("uid", "a"),
                vec![DiffEntry::set("mail", json!("new@x"))],
                false,
            )
            .await
            .unwrap();
        let summary = run(&fx, &datatype, source, &CycleOptions::default()).await;

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 1);

        let resource = fx
            .store
            .get_one("accounts", &Query::eq("data.uid", "a"), 0)
            .await
            .unwrap();
        assert_eq!(resource.version, 2);
        let converged = fx
            .destination
            .get_one(&Query::eq("username", "a"))
            .await
            .unwrap();
        assert_eq!(converged.get("mail"), Some(&json!("new@x")));
    }

    #[tokio::test]
    async fn test_unmatched_objects_are_skipped() {
        let fx = fixture();
        let datatype = datatype(json!([{
            "name": "employees",
            "condition": "object.kind == \"employee\"",
            "map": {"username": {"from": "uid"}},
        }]));
        let source = source_with(vec![
            json!({"uid": "a", "kind": "employee"}),
            json!({"uid": "b", "kind": "contractor"}),
        ])
        .await;

        let summary = run(&fx, &datatype, source, &CycleOptions::default()).await;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(fx.destination.objects().await.len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_absent_deletes_everywhere() {
        let fx = fixture();
        let source = source_with(vec![
            json!({"uid": "a", "mail": "a@x"}),
            json!({"uid": "b", "mail": "b@x"}),
        ])
        .await;

        run(&fx, &default_datatype(), source.clone(), &CycleOptions::default()).await;

        let leavers = datatype(json!([{
            "name": "leavers",
            "ensure": "absent",
            "map": {"username": {"from": "uid"}, "mail": {}},
        }]));
        let summary = run(&fx, &leavers, source, &CycleOptions::default()).await;

        assert_eq!(summary.deleted, 2);
        assert_eq!(fx.store.count("accounts", &Query::empty()).await.unwrap(), 0);
        assert!(fx.destination.objects().await.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_exists_does_not_overwrite() {
        let fx = fixture();
        fx.destination
            .seed(vec![object(json!({"username": "a", "mail": "old@x"}))])
            .await;
        let joiners = datatype(json!([{
            "name": "joiners",
            "ensure": "exists",
            "map": {"username": {"from": "uid"}, "mail": {}},
        }]));
        let source = source_with(vec![json!({"uid": "a", "mail": "new@x"})]).await;

        let summary = run(&fx, &joiners, source, &CycleOptions::default()).await;
        assert_eq!(summary.created, 1);

        let kept = fx
            .destination
            .get_one(&Query::eq("username", "a"))
            .await
            .unwrap();
        assert_eq!(kept.get("mail"), Some(&json!("old@x")));
    }

    #[tokio::test]
    async fn test_ensure_disabled_flags_destination() {
        let fx = fixture();
        let suspended = datatype(json!([{
            "name": "suspended",
            "ensure": "disabled",
            "map": {"username": {"from": "uid"}},
        }]));
        let source = source_with(vec![json!({"uid": "a"})]).await;

        run(&fx, &suspended, source, &CycleOptions::default()).await;

        let flagged = fx
            .destination
            .get_one(&Query::eq("username", "a"))
            .await
            .unwrap();
        assert_eq!(flagged.get("disabled"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_simulate_persists_nothing() {
        let fx = fixture();
        let source = source_with(vec![
            json!({"uid": "a", "mail": "a@x"}),
            json!({"uid": "b", "mail": "b@x"}),
        ])
        .await;

        let options = CycleOptions {
            simulate: true,
            ..CycleOptions::default()
        };
        let summary = run(&fx, &default_datatype(), source, &options).await;

        assert_eq!(summary.created, 2);
        assert_eq!(fx.store.count("accounts", &Query::empty()).await.unwrap(), 0);
        assert!(fx.destination.objects().await.is_empty());
    }

    #[tokio::test]
    async fn test_offset_and_limit_bound_the_cycle() {
        let fx = fixture();
        let source = source_with(vec![
            json!({"uid": "a"}),
            json!({"uid": "b"}),
            json!({"uid": "c"}),
        ])
        .await;

        let options = CycleOptions {
            offset: Some(1),
            limit: Some(1),
            ..CycleOptions::default()
        };
        let summary = run(&fx, &default_datatype(), source, &options).await;

        assert_eq!(summary.created, 1);
        let objects = fx.destination.objects().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["username"], json!("b"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_processing() {
        let fx = fixture();
        let source = source_with(vec![json!({"uid": "a"})]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = fx
            .orchestrator
            .run_cycle(
                &default_datatype(),
                Arc::new(source),
                &[Arc::new(fx.destination.clone())],
                &CycleOptions::default(),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(summary.created + summary.updated + summary.skipped, 0);
        assert_eq!(fx.store.count("accounts", &Query::empty()).await.unwrap(), 0);
    }

    /// Delegates to an in-memory endpoint but rejects the creation of one
    /// configured object.
    struct FailOnCreate {
        inner: MemoryEndpoint,
        reject: String,
    }

    #[async_trait]
    impl EndpointAdapter for FailOnCreate {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn kind(&self) -> EndpointKind {
            self.inner.kind()
        }
        fn endpoint_type(&self) -> EndpointType {
            self.inner.endpoint_type()
        }
        fn identifier(&self) -> &str {
            self.inner.identifier()
        }
        async fn setup(&self, simulate: bool) -> SyncResult<()> {
            self.inner.setup(simulate).await
        }
        async fn shutdown(&self, simulate: bool) -> SyncResult<()> {
            self.inner.shutdown(simulate).await
        }
        async fn count(&self, query: &Query) -> SyncResult<u64> {
            self.inner.count(query).await
        }
        async fn get_one(&self, query: &Query) -> SyncResult<EndpointObject> {
            self.inner.get_one(query).await
        }
        async fn get_all(&self, query: &Query) -> SyncResult<ObjectStream> {
            self.inner.get_all(query).await
        }
        async fn create(
            &self,
            object: &EndpointObject,
            simulate: bool,
        ) -> SyncResult<Option<String>> {
            if object.get("username") == Some(&json!(self.reject.as_str())) {
                return Err(SyncError::query("duplicate key"));
            }
            self.inner.create(object, simulate).await
        }
        async fn update(
            &self,
            query: &Query,
            diff: Vec<DiffEntry>,
            simulate: bool,
        ) -> SyncResult<()> {
            self.inner.update(query, diff, simulate).await
        }
        async fn disable(&self, query: &Query, simulate: bool) -> SyncResult<()> {
            self.inner.disable(query, simulate).await
        }
        async fn delete(
            &self,
            query: &Query,
            object: &EndpointObject,
            simulate: bool,
        ) -> SyncResult<bool> {
            self.inner.delete(query, object, simulate).await
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_object() {
        let fx = fixture();
        let source = source_with(vec![
            json!({"uid": "a"}),
            json!({"uid": "b"}),
            json!({"uid": "c"}),
        ])
        .await;
        let flaky = FailOnCreate {
            inner: fx.destination.clone(),
            reject: "b".into(),
        };

        let summary = fx
            .orchestrator
            .run_cycle(
                &default_datatype(),
                Arc::new(source),
                &[Arc::new(flaky)],
                &CycleOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.failed, 1);
        let failure = summary.failure_for("b").unwrap();
        assert!(failure.error.contains("duplicate key"));

        // the failing object must not gain an authoritative record
        assert_eq!(fx.store.count("accounts", &Query::empty()).await.unwrap(), 2);
        assert!(fx
            .store
            .get_one("accounts", &Query::eq("data.uid", "b"), 0)
            .await
            .is_err());
    }

    /// Loses the first version race on purpose, then behaves.
    struct ConflictOnce {
        inner: Arc<MemoryStore>,
        tripped: AtomicBool,
    }

    #[async_trait]
    impl ResourceStore for ConflictOnce {
        async fn create(
            &self,
            collection: &str,
            data: Map<String, Value>,
            endpoints: Map<String, Value>,
            simulate: bool,
        ) -> SyncResult<ResourceId> {
            self.inner.create(collection, data, endpoints, simulate).await
        }
        async fn update(
            &self,
            collection: &str,
            resource: &Resource,
            new_data: Map<String, Value>,
            endpoints: Option<Map<String, Value>>,
            simulate: bool,
        ) -> SyncResult<bool> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                return Err(SyncError::Conflict {
                    id: resource.id,
                    expected_version: resource.version,
                });
            }
            self.inner
                .update(collection, resource, new_data, endpoints, simulate)
                .await
        }
        async fn delete(
            &self,
            collection: &str,
            id: ResourceId,
            simulate: bool,
        ) -> SyncResult<bool> {
            self.inner.delete(collection, id, simulate).await
        }
        async fn count(&self, collection: &str, query: &Query) -> SyncResult<u64> {
            self.inner.count(collection, query).await
        }
        async fn get_one(
            &self,
            collection: &str,
            query: &Query,
            version: u64,
        ) -> SyncResult<Resource> {
            self.inner.get_one(collection, query, version).await
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
            self.inner
                .get_all(collection, query, offset, limit, sort, version)
                .await
        }
        async fn watch(
            &self,
            collection: &str,
            resume_token: Option<u64>,
            include_existing: bool,
            query: Query,
        ) -> SyncResult<EventStream> {
            self.inner
                .watch(collection, resume_token, include_existing, query)
                .await
        }
        async fn get_history(
            &self,
            collection: &str,
            id: ResourceId,
            filter: Option<Query>,
            offset: Option<i64>,
            limit: Option<usize>,
        ) -> SyncResult<(Vec<Resource>, u64)> {
            self.inner
                .get_history(collection, id, filter, offset, limit)
                .await
        }
    }

    #[tokio::test]
    async fn test_lost_version_race_is_retried_once() {
        let memory = Arc::new(MemoryStore::new());
        let store = Arc::new(ConflictOnce {
            inner: memory.clone(),
            tripped: AtomicBool::new(false),
        });
        let orchestrator = SyncOrchestrator::new(store);
        let destination = endpoint("dir", "destination", "username");
        let datatype = default_datatype();
        let source = source_with(vec![json!({"uid": "a", "mail": "a@x"})]).await;

        let first = orchestrator
            .run_cycle(
                &datatype,
                Arc::new(source.clone()),
                &[Arc::new(destination.clone())],
                &CycleOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(first.created, 1);

        source
            .update(
                &Query::eq("uid", "a"),
                vec![DiffEntry::set("mail", json!("new@x"))],
                false,
            )
            .await
            .unwrap();
        let second = orchestrator
            .run_cycle(
                &datatype,
                Arc::new(source),
                &[Arc::new(destination)],
                &CycleOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(second.updated, 1);
        assert_eq!(second.failed, 0);
        let resource = memory
            .get_one("accounts", &Query::eq("data.uid", "a"), 0)
            .await
            .unwrap();
        assert_eq!(resource.data["mail"], json!("new@x"));
        assert_eq!(resource.version, 2);
    }

    #[tokio::test]
    async fn test_relation_lookup_through_store() {
        let fx = fixture();
        let group = fx
            .store
            .create(
                "groups",
                object(json!({"name": "staff"})),
                Map::new(),
                false,
            )
            .await
            .unwrap();

        let datatype = datatype(json!([{
            "name": "default",
            "map": {
                "username": {"from": "uid"},
                "groupname": {
                    "from": "group",
                    "map": {"collection": "groups", "to": "name"},
                },
            },
        }]));
        let source = source_with(vec![json!({"uid": "a", "group": group.to_string()})]).await;

        let summary = run(&fx, &datatype, source, &CycleOptions::default()).await;
        assert_eq!(summary.created, 1);

        let mapped = fx
            .destination
            .get_one(&Query::eq("username", "a"))
            .await
            .unwrap();
        assert_eq!(mapped.get("groupname"), Some(&json!("staff")));
    }

    #[tokio::test]
    async fn test_invalid_object_is_recorded_not_fatal() {
        let fx = fixture();
        let source = source_with(vec![
            json!({"mail": "nobody@x"}),
            json!({"uid": "a"}),
        ])
        .await;

        let summary = run(&fx, &default_datatype(), source, &CycleOptions::default()).await;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.failures[0].error.contains("uid"));
    }
}
