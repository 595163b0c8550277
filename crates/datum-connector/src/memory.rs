//! In-memory endpoint.
//!
//! Backs orchestrator tests and local pipelines; objects live in a shared
//! vector and the external key is the configured correlation identifier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use datum_core::{Query, SyncError, SyncResult};

use crate::diff::{DiffAction, DiffEntry};
use crate::object::EndpointObject;
use crate::traits::{EndpointAdapter, ObjectStream};
use crate::types::{EndpointConfig, EndpointKind, EndpointType};

/// In-memory [`EndpointAdapter`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryEndpoint {
    config: EndpointConfig,
    objects: Arc<RwLock<Vec<Map<String, Value>>>>,
    connected: Arc<AtomicBool>,
}

impl MemoryEndpoint {
    pub fn new(config: EndpointConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            objects: Arc::new(RwLock::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Seed the endpoint with existing objects, bypassing `create`.
    pub async fn seed(&self, objects: Vec<Map<String, Value>>) {
        self.objects.write().await.extend(objects);
    }

    /// Snapshot of the current objects, for assertions.
    pub async fn objects(&self) -> Vec<Map<String, Value>> {
        self.objects.read().await.clone()
    }

    fn external_key(&self, data: &Map<String, Value>) -> Option<String> {
        match data.get(&self.config.identifier) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }
}

#[async_trait]
impl EndpointAdapter for MemoryEndpoint {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> EndpointKind {
        EndpointKind::Memory
    }

    fn endpoint_type(&self) -> EndpointType {
        self.config.endpoint_type
    }

    fn identifier(&self) -> &str {
        &self.config.identifier
    }

    async fn setup(&self, _simulate: bool) -> SyncResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self, _simulate: bool) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn count(&self, query: &Query) -> SyncResult<u64> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|data| query.matches(&Value::Object((*data).clone())))
            .count() as u64)
    }

    async fn get_one(&self, query: &Query) -> SyncResult<EndpointObject> {
        let objects = self.objects.read().await;
        let mut matches = objects
            .iter()
            .filter(|data| query.matches(&Value::Object((*data).clone())));

        let Some(first) = matches.next() else {
            return Err(SyncError::not_found(format!(
                "no object found with filter {} on endpoint [{}]",
                query.to_value(),
                self.config.name
            )));
        };
        if matches.next().is_some() {
            return Err(SyncError::multiple_found(format!(
                "multiple objects found with filter {} on endpoint [{}]",
                query.to_value(),
                self.config.name
            )));
        }

        Ok(EndpointObject::new(first.clone()))
    }

    async fn get_all(&self, query: &Query) -> SyncResult<ObjectStream> {
        let objects = self.objects.read().await;
        let matches: Vec<SyncResult<EndpointObject>> = objects
            .iter()
            .filter(|data| query.matches(&Value::Object((*data).clone())))
            .map(|data| Ok(EndpointObject::new(data.clone())))
            .collect();
        Ok(Box::pin(stream::iter(matches)))
    }

    async fn create(
        &self,
        object: &EndpointObject,
        simulate: bool,
    ) -> SyncResult<Option<String>> {
        let key = self.external_key(&object.data);

        debug!(endpoint = %self.config.name, key = ?key, "create endpoint object");

        if !simulate {
            self.objects.write().await.push(object.data.clone());
        }
        Ok(key)
    }

    async fn update(
        &self,
        query: &Query,
        diff: Vec<DiffEntry>,
        simulate: bool,
    ) -> SyncResult<()> {
        if simulate {
            return Ok(());
        }

        let mut objects = self.objects.write().await;
        let Some(data) = objects
            .iter_mut()
            .find(|data| query.matches(&Value::Object((*data).clone())))
        else {
            return Err(SyncError::not_found(format!(
                "no object found with filter {} on endpoint [{}]",
                query.to_value(),
                self.config.name
            )));
        };

        for entry in diff {
            match entry.data {
                DiffAction::Set(value) => {
                    data.insert(entry.attribute, value);
                }
                DiffAction::Unset => {
                    data.remove(&entry.attribute);
                }
            }
        }
        Ok(())
    }

    async fn disable(&self, query: &Query, simulate: bool) -> SyncResult<()> {
        self.update(
            query,
            vec![DiffEntry::set("disabled", Value::Bool(true))],
            simulate,
        )
        .await
    }

    async fn delete(
        &self,
        query: &Query,
        _object: &EndpointObject,
        simulate: bool,
    ) -> SyncResult<bool> {
        if simulate {
            return Ok(true);
        }

        let mut objects = self.objects.write().await;
        let before = objects.len();
        objects.retain(|data| !query.matches(&Value::Object(data.clone())));
        Ok(objects.len() < before)
    }
}
