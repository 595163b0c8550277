//! Structured boolean queries.
//!
//! A query is a nested tree of `$and`/`$or` groups over field=value clauses:
//!
//! ```json
//! {"$and": [{"foo": "bar", "foobar": "foobar"}, {"bar": "foo"}]}
//! ```
//!
//! Clause and field order is preserved, which matters for connectors that
//! translate queries into positional filter expressions. The in-memory
//! [`Query::matches`] evaluator is used by the resource store and the memory
//! endpoint; SQL-backed connectors translate the tree into their native
//! syntax instead.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{SyncError, SyncResult};

/// A structured boolean query over object fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// All sub-queries must match.
    And(Vec<Query>),
    /// At least one sub-query must match.
    Or(Vec<Query>),
    /// All field=value pairs must match. An empty clause matches everything.
    Clause(Map<String, Value>),
}

impl Query {
    /// The query that matches every object.
    pub fn empty() -> Self {
        Query::Clause(Map::new())
    }

    /// Check whether this query has no constraints at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Query::And(group) | Query::Or(group) => group.iter().all(Query::is_empty),
            Query::Clause(clause) => clause.is_empty(),
        }
    }

    /// Create a single field=value equality query.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut clause = Map::new();
        clause.insert(field.into(), value.into());
        Query::Clause(clause)
    }

    /// Parse a query from its JSON representation.
    ///
    /// An object with a single `$and`/`$or` key holding an array of
    /// sub-queries forms a group; any other object is a clause. Unknown `$`
    /// operators are rejected.
    pub fn from_value(value: &Value) -> SyncResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| SyncError::validation("query must be a JSON object"))?;

        if let Some(operator) = object.keys().find(|key| key.starts_with('$')) {
            if object.len() != 1 {
                return Err(SyncError::validation(
                    "a query group must contain exactly one $and/$or operator",
                ));
            }

            let members = object[operator]
                .as_array()
                .ok_or_else(|| {
                    SyncError::validation(format!("query operator {operator} requires an array"))
                })?
                .iter()
                .map(Query::from_value)
                .collect::<SyncResult<Vec<_>>>()?;

            return match operator.as_str() {
                "$and" => Ok(Query::And(members)),
                "$or" => Ok(Query::Or(members)),
                _ => Err(SyncError::validation(format!(
                    "unknown query operator {operator}"
                ))),
            };
        }

        Ok(Query::Clause(object.clone()))
    }

    /// Serialize the query back into its JSON representation.
    pub fn to_value(&self) -> Value {
        match self {
            Query::And(group) => {
                let members = group.iter().map(Query::to_value).collect();
                let mut object = Map::new();
                object.insert("$and".to_string(), Value::Array(members));
                Value::Object(object)
            }
            Query::Or(group) => {
                let members = group.iter().map(Query::to_value).collect();
                let mut object = Map::new();
                object.insert("$or".to_string(), Value::Array(members));
                Value::Object(object)
            }
            Query::Clause(clause) => Value::Object(clause.clone()),
        }
    }

    /// Evaluate the query against an object.
    ///
    /// Clause fields support dot notation for nested lookups.
    pub fn matches(&self, data: &Value) -> bool {
        match self {
            Query::And(group) => group.iter().all(|q| q.matches(data)),
            Query::Or(group) => group.is_empty() || group.iter().any(|q| q.matches(data)),
            Query::Clause(clause) => clause
                .iter()
                .all(|(field, expected)| lookup(data, field) == Some(expected)),
        }
    }
}

/// Look up a dot-notation path in a JSON value.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for part in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(items) => {
                let index: usize = part.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

impl Serialize for Query {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Query {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Query::from_value(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_clause() {
        let query = Query::from_value(&json!({"uid": "foo"})).unwrap();
        assert_eq!(query, Query::eq("uid", "foo"));
    }

    #[test]
    fn test_parse_and_group() {
        let query = Query::from_value(&json!({
            "$and": [
                {"foo": "bar", "foobar": "foobar"},
                {"bar": "foo", "barf": "barf"},
            ]
        }))
        .unwrap();

        match &query {
            Query::And(group) => assert_eq!(group.len(), 2),
            other => panic!("expected And group, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_operator() {
        assert!(Query::from_value(&json!({"$nor": []})).is_err());
        assert!(Query::from_value(&json!("uid=foo")).is_err());
    }

    #[test]
    fn test_clause_field_order_preserved() {
        let query = Query::from_value(&json!({"b": 1, "a": 2})).unwrap();
        let Query::Clause(clause) = query else {
            panic!("expected clause");
        };
        let fields: Vec<&str> = clause.keys().map(String::as_str).collect();
        assert_eq!(fields, vec!["b", "a"]);
    }

    #[test]
    fn test_matches_clause() {
        let query = Query::from_value(&json!({"uid": "foo", "active": true})).unwrap();
        assert!(query.matches(&json!({"uid": "foo", "active": true, "other": 1})));
        assert!(!query.matches(&json!({"uid": "foo", "active": false})));
        assert!(!query.matches(&json!({"uid": "foo"})));
    }

    #[test]
    fn test_matches_nested_groups() {
        let query = Query::from_value(&json!({
            "$or": [
                {"kind": "user"},
                {"$and": [{"kind": "group"}, {"visible": true}]},
            ]
        }))
        .unwrap();

        assert!(query.matches(&json!({"kind": "user"})));
        assert!(query.matches(&json!({"kind": "group", "visible": true})));
        assert!(!query.matches(&json!({"kind": "group", "visible": false})));
    }

    #[test]
    fn test_matches_dot_notation() {
        let query = Query::from_value(&json!({"address.city": "Zurich"})).unwrap();
        assert!(query.matches(&json!({"address": {"city": "Zurich"}})));
        assert!(!query.matches(&json!({"address": {"city": "Bern"}})));
    }

    #[test]
    fn test_empty_matches_everything() {
        assert!(Query::empty().matches(&json!({"anything": 1})));
        assert!(Query::empty().is_empty());
    }

    #[test]
    fn test_roundtrip() {
        let value = json!({"$and": [{"foo": "bar"}, {"$or": [{"a": 1}, {"b": 2}]}]});
        let query = Query::from_value(&value).unwrap();
        assert_eq!(query.to_value(), value);
    }
}
