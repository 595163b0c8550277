//! The endpoint adapter contract.
//!
//! Every connector implements [`EndpointAdapter`]; the orchestrator drives
//! all of them identically. Connectors with richer native capabilities
//! override the defaulted methods ([`EndpointAdapter::transform_query`],
//! [`EndpointAdapter::get_diff`]).

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use datum_core::{Query, SyncResult};

use crate::diff::{AttributeDiff, DiffEntry};
use crate::object::EndpointObject;
use crate::types::{EndpointKind, EndpointType};

/// A lazy, finite sequence of endpoint objects.
pub type ObjectStream = BoxStream<'static, SyncResult<EndpointObject>>;

/// A query translated into a connector's native filter syntax.
///
/// `filter` carries the filter expression; `values` the positionally
/// ordered operands for connectors with placeholder semantics. JSON-native
/// connectors embed values inline and leave `values` empty.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedQuery {
    pub filter: String,
    pub values: Vec<Value>,
}

/// Uniform connector interface.
///
/// `setup`/`shutdown` bracket one synchronization cycle and must be
/// idempotent, safe to call even if the previous call failed partway.
/// All mutating operations honor `simulate`.
#[async_trait]
pub trait EndpointAdapter: Send + Sync {
    /// The endpoint's configured name.
    fn name(&self) -> &str;

    /// The connector kind.
    fn kind(&self) -> EndpointKind;

    /// Whether this endpoint is read from or reconciled into.
    fn endpoint_type(&self) -> EndpointType;

    /// The attribute correlating engine objects with this endpoint's
    /// objects.
    fn identifier(&self) -> &str;

    /// Acquire connection resources for one cycle.
    async fn setup(&self, simulate: bool) -> SyncResult<()>;

    /// Release connection resources after one cycle.
    async fn shutdown(&self, simulate: bool) -> SyncResult<()>;

    /// Count objects matching the query.
    async fn count(&self, query: &Query) -> SyncResult<u64>;

    /// Fetch exactly one object matching the query.
    ///
    /// Fails with `NotFound` on zero matches and `MultipleFound` on an
    /// ambiguous filter; both are caller-data errors, never retried.
    async fn get_one(&self, query: &Query) -> SyncResult<EndpointObject>;

    /// Stream all objects matching the query.
    async fn get_all(&self, query: &Query) -> SyncResult<ObjectStream>;

    /// Translate a structured query into the connector's native filter.
    ///
    /// The default is JSON-native: the query itself is the filter and no
    /// positional values are extracted.
    fn transform_query(&self, query: &Query) -> SyncResult<TransformedQuery> {
        Ok(TransformedQuery {
            filter: query.to_value().to_string(),
            values: Vec::new(),
        })
    }

    /// Translate an engine-level attribute diff into this connector's
    /// ordered change list.
    ///
    /// The default passes every change through unchanged; connectors
    /// managing a fixed attribute surface filter to what they own. An
    /// empty diff always translates to an empty list.
    fn get_diff(&self, diff: &AttributeDiff) -> SyncResult<Vec<DiffEntry>> {
        Ok(diff
            .iter()
            .map(|(attribute, action)| DiffEntry {
                attribute: attribute.clone(),
                data: action.clone(),
            })
            .collect())
    }

    /// Create an object, returning its external key when the connector
    /// has one.
    ///
    /// Connectors with composite identity semantics perform an ordered
    /// sub-operation sequence; a sub-operation's query failure aborts the
    /// remainder and yields `Ok(None)` rather than an error, so the
    /// orchestrator can continue with other objects.
    async fn create(&self, object: &EndpointObject, simulate: bool)
        -> SyncResult<Option<String>>;

    /// Apply a translated change list to the object matching `query`.
    async fn update(
        &self,
        query: &Query,
        diff: Vec<DiffEntry>,
        simulate: bool,
    ) -> SyncResult<()>;

    /// Flag the object matching `query` as inactive, connector-natively.
    async fn disable(&self, query: &Query, simulate: bool) -> SyncResult<()>;

    /// Delete the tracked object.
    ///
    /// Composite connectors reverse their creation order (dependent
    /// entities before the root). A native query failure yields
    /// `Ok(false)` rather than an error.
    async fn delete(
        &self,
        query: &Query,
        object: &EndpointObject,
        simulate: bool,
    ) -> SyncResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use datum_core::SyncError;
    use serde_json::json;

    struct BareAdapter;

    #[async_trait]
    impl EndpointAdapter for BareAdapter {
        fn name(&self) -> &str {
            "bare"
        }

        fn kind(&self) -> EndpointKind {
            EndpointKind::Memory
        }

        fn endpoint_type(&self) -> EndpointType {
            EndpointType::Destination
        }

        fn identifier(&self) -> &str {
            "uid"
        }

        async fn setup(&self, _simulate: bool) -> SyncResult<()> {
            Ok(())
        }

        async fn shutdown(&self, _simulate: bool) -> SyncResult<()> {
            Ok(())
        }

        async fn count(&self, _query: &Query) -> SyncResult<u64> {
            Ok(0)
        }

        async fn get_one(&self, _query: &Query) -> SyncResult<EndpointObject> {
            Err(SyncError::not_found("empty adapter"))
        }

        async fn get_all(&self, _query: &Query) -> SyncResult<ObjectStream> {
            Ok(Box::pin(futures_util::stream::empty()))
        }

        async fn create(
            &self,
            _object: &EndpointObject,
            _simulate: bool,
        ) -> SyncResult<Option<String>> {
            Ok(None)
        }

        async fn update(
            &self,
            _query: &Query,
            _diff: Vec<DiffEntry>,
            _simulate: bool,
        ) -> SyncResult<()> {
            Ok(())
        }

        async fn disable(&self, _query: &Query, _simulate: bool) -> SyncResult<()> {
            Ok(())
        }

        async fn delete(
            &self,
            _query: &Query,
            _object: &EndpointObject,
            _simulate: bool,
        ) -> SyncResult<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_default_transform_query_is_json_native() {
        let adapter = BareAdapter;
        let query = Query::eq("username", "foobar");
        let transformed = adapter.transform_query(&query).unwrap();
        assert_eq!(transformed.filter, r#"{"username":"foobar"}"#);
        assert!(transformed.values.is_empty());
    }

    #[test]
    fn test_default_get_diff_passes_through() {
        use crate::diff::DiffAction;

        let adapter = BareAdapter;
        let diff: AttributeDiff = vec![
            ("name".to_string(), DiffAction::Set(json!("foo"))),
            ("stale".to_string(), DiffAction::Unset),
        ];

        let entries = adapter.get_diff(&diff).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], DiffEntry::set("name", json!("foo")));
        assert_eq!(entries[1], DiffEntry::unset("stale"));
    }

    #[test]
    fn test_default_get_diff_empty_is_empty() {
        assert!(BareAdapter.get_diff(&Vec::new()).unwrap().is_empty());
    }
}
