//! The attribute mapping engine.
//!
//! An attribute map is an ordered set of per-attribute rules producing a
//! destination-shaped record from a source record. Rules are validated at
//! admission against a fixed option template; unknown options are rejected
//! with a descriptive error rather than ignored.
//!
//! Resolution per attribute: `value` → `script` → `from`/`name` field copy
//! → unresolved. A resolved value then passes through `rewrite`, `unwind`,
//! `type` coercion and the `required`/`require_regex` checks, in that
//! order. The `ensure` policy only matters when composing against an
//! existing destination value, in [`AttributeMap::diff`].

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use datum_connector::{AttributeDiff, DiffAction};
use datum_core::query::lookup;
use datum_core::{SyncError, SyncResult};

use crate::script::ScriptEngine;

/// Per-attribute desired-state policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeEnsure {
    /// Only set when the destination does not have the attribute yet.
    Exists,
    /// Always converge the destination to the newly resolved value.
    #[default]
    Last,
    /// Union with the existing destination value; arrays concatenate
    /// de-duplicated, scalars last-wins.
    Merge,
    /// Actively remove the attribute from the destination.
    Absent,
}

/// Declared target type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Int,
    Bool,
    Array,
}

/// How a resolved sequence flattens to a scalar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnwindMode {
    #[default]
    First,
    Last,
    Join,
}

/// Sequence flattening policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Unwind {
    #[serde(default)]
    pub mode: UnwindMode,
    /// Separator for [`UnwindMode::Join`].
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    ",".to_string()
}

/// One ordered substitution applied to a resolved string value.
///
/// Exactly one of `from` (literal full match) or `match` (regex, replaces
/// all occurrences) must be given.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriteRule {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default, rename = "match")]
    pub pattern: Option<String>,
    pub to: String,
}

/// Nested mapping into a related collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapRelation {
    /// Collection the related object lives in.
    pub collection: String,
    /// Field projected from the related object's data.
    pub to: String,
}

/// One attribute rule, normalized against the default template
/// (`ensure=last`, no rewrites, not required, everything else unset).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeDefinition {
    #[serde(default)]
    pub ensure: AttributeEnsure,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default, rename = "type")]
    pub attribute_type: Option<AttributeType>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub unwind: Option<Unwind>,
    #[serde(default)]
    pub rewrite: Vec<RewriteRule>,
    #[serde(default)]
    pub require_regex: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub map: Option<MapRelation>,
}

impl AttributeDefinition {
    fn validate(&self, attribute: &str) -> SyncResult<()> {
        for rule in &self.rewrite {
            match (&rule.from, &rule.pattern) {
                (Some(_), Some(_)) | (None, None) => {
                    return Err(SyncError::validation(format!(
                        "attribute [{attribute}]: a rewrite rule requires exactly one of [from] or [match]"
                    )));
                }
                (None, Some(pattern)) => {
                    Regex::new(pattern).map_err(|err| {
                        SyncError::validation(format!(
                            "attribute [{attribute}]: invalid rewrite pattern: {err}"
                        ))
                    })?;
                }
                (Some(_), None) => {}
            }
        }

        if let Some(pattern) = &self.require_regex {
            Regex::new(pattern).map_err(|err| {
                SyncError::validation(format!(
                    "attribute [{attribute}]: invalid require_regex: {err}"
                ))
            })?;
        }

        Ok(())
    }
}

/// Resolves nested `map` relations against another collection.
///
/// The engine stays storage-agnostic; the orchestrator wires the store
/// behind this seam.
#[async_trait]
pub trait RelationResolver: Send + Sync {
    /// Look up the related object in `collection` by the resolved key and
    /// project field `to` from its data. `Ok(None)` when no relation
    /// exists.
    async fn resolve(&self, collection: &str, key: &Value, to: &str)
        -> SyncResult<Option<Value>>;
}

/// A resolver for maps without relations.
pub struct NoRelations;

#[async_trait]
impl RelationResolver for NoRelations {
    async fn resolve(&self, _: &str, _: &Value, _: &str) -> SyncResult<Option<Value>> {
        Ok(None)
    }
}

/// An ordered, validated set of attribute rules.
#[derive(Debug, Clone)]
pub struct AttributeMap {
    attributes: Vec<(String, AttributeDefinition)>,
}

impl AttributeMap {
    /// Parse and validate a map from its JSON object form.
    ///
    /// Attribute order is preserved. Unknown rule options are rejected
    /// with the offending attribute named.
    pub fn from_value(value: &Value) -> SyncResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| SyncError::validation("attribute map must be a JSON object"))?;

        let mut attributes = Vec::with_capacity(object.len());
        for (attribute, rule) in object {
            let definition: AttributeDefinition =
                serde_json::from_value(rule.clone()).map_err(|err| {
                    SyncError::validation(format!("attribute [{attribute}]: {err}"))
                })?;
            definition.validate(attribute)?;
            attributes.push((attribute.clone(), definition));
        }

        Ok(Self { attributes })
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// The rule for one attribute, if declared.
    pub fn get(&self, attribute: &str) -> Option<&AttributeDefinition> {
        self.attributes
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, definition)| definition)
    }

    /// Produce the destination-shaped record for one source record.
    ///
    /// Unresolvable optional attributes are left out; unresolvable
    /// `required` attributes fail with `AttributeNotResolvable`.
    pub async fn resolve(
        &self,
        source: &Map<String, Value>,
        scripts: &ScriptEngine,
        relations: &dyn RelationResolver,
    ) -> SyncResult<Map<String, Value>> {
        let mut mapped = Map::new();

        for (attribute, definition) in &self.attributes {
            if definition.ensure == AttributeEnsure::Absent {
                continue;
            }

            let mut resolved = resolve_source(attribute, definition, source, scripts)?;

            if let (Some(relation), Some(key)) = (&definition.map, resolved.clone()) {
                resolved = relations
                    .resolve(&relation.collection, &key, &relation.to)
                    .await?;
            }

            if let Some(value) = resolved.as_mut() {
                apply_rewrite(value, &definition.rewrite);
                if let Some(unwind) = &definition.unwind {
                    *value = apply_unwind(value, unwind);
                }
                if let Some(target) = definition.attribute_type {
                    *value = coerce(attribute, value, target)?;
                }
            }

            let resolved = resolved.filter(|value| !value.is_null());

            match resolved {
                Some(value) => {
                    if let Some(pattern) = &definition.require_regex {
                        check_require_regex(attribute, pattern, &value)?;
                    }
                    mapped.insert(attribute.clone(), value);
                }
                None if definition.required => {
                    return Err(SyncError::attribute_not_resolvable(
                        attribute,
                        format!("required attribute [{attribute}] could not be resolved"),
                    ));
                }
                None => {}
            }
        }

        Ok(mapped)
    }

    /// Compose a mapped record against the existing destination values,
    /// yielding the ordered minimal change set per each attribute's
    /// `ensure` policy. Converged input yields an empty diff.
    pub fn diff(
        &self,
        mapped: &Map<String, Value>,
        existing: &Map<String, Value>,
    ) -> AttributeDiff {
        let mut diff = Vec::new();

        for (attribute, definition) in &self.attributes {
            let current = existing.get(attribute);
            let desired = mapped.get(attribute);

            match definition.ensure {
                AttributeEnsure::Absent => {
                    if current.is_some() {
                        diff.push((attribute.clone(), DiffAction::Unset));
                    }
                }
                AttributeEnsure::Exists => {
                    if let (Some(desired), None) = (desired, current) {
                        diff.push((attribute.clone(), DiffAction::Set(desired.clone())));
                    }
                }
                AttributeEnsure::Last => {
                    if let Some(desired) = desired {
                        if current != Some(desired) {
                            diff.push((attribute.clone(), DiffAction::Set(desired.clone())));
                        }
                    }
                }
                AttributeEnsure::Merge => {
                    if let Some(desired) = desired {
                        let merged = merge_values(current, desired);
                        if current != Some(&merged) {
                            diff.push((attribute.clone(), DiffAction::Set(merged)));
                        }
                    }
                }
            }
        }

        diff
    }
}

fn resolve_source(
    attribute: &str,
    definition: &AttributeDefinition,
    source: &Map<String, Value>,
    scripts: &ScriptEngine,
) -> SyncResult<Option<Value>> {
    if let Some(value) = &definition.value {
        return Ok(Some(value.clone()));
    }

    if let Some(script) = &definition.script {
        let value = scripts.eval_value(script, source).map_err(|err| {
            SyncError::attribute_not_resolvable(
                attribute,
                format!("script for attribute [{attribute}] failed: {err}"),
            )
        })?;
        return Ok(Some(value));
    }

    let field = definition
        .from
        .as_deref()
        .or(definition.name.as_deref())
        .unwrap_or(attribute);
    Ok(lookup(&Value::Object(source.clone()), field).cloned())
}

fn apply_rewrite(value: &mut Value, rules: &[RewriteRule]) {
    let Value::String(current) = value else {
        return;
    };

    for rule in rules {
        match (&rule.from, &rule.pattern) {
            (Some(literal), _) => {
                if current == literal {
                    *current = rule.to.clone();
                }
            }
            (None, Some(pattern)) => {
                // validated at admission
                if let Ok(re) = Regex::new(pattern) {
                    *current = re.replace_all(current, rule.to.as_str()).into_owned();
                }
            }
            (None, None) => {}
        }
    }
}

fn apply_unwind(value: &Value, unwind: &Unwind) -> Value {
    let Value::Array(items) = value else {
        return value.clone();
    };

    match unwind.mode {
        UnwindMode::First => items.first().cloned().unwrap_or(Value::Null),
        UnwindMode::Last => items.last().cloned().unwrap_or(Value::Null),
        UnwindMode::Join => Value::String(
            items
                .iter()
                .map(value_to_string)
                .collect::<Vec<_>>()
                .join(&unwind.separator),
        ),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn coerce(attribute: &str, value: &Value, target: AttributeType) -> SyncResult<Value> {
    let coerced = match (target, value) {
        (AttributeType::String, Value::String(_)) => Some(value.clone()),
        (AttributeType::String, Value::Null) => Some(Value::Null),
        (AttributeType::String, other) => Some(Value::String(value_to_string(other))),

        (AttributeType::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
        (AttributeType::Int, Value::Number(n)) => n
            .as_f64()
            .map(|f| Value::Number(serde_json::Number::from(f as i64))),
        (AttributeType::Int, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .map(|n| Value::Number(n.into())),
        (AttributeType::Int, Value::Bool(b)) => Some(Value::Number(i64::from(*b).into())),

        (AttributeType::Bool, Value::Bool(_)) => Some(value.clone()),
        (AttributeType::Bool, Value::String(s)) => match s.as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" | "" => Some(Value::Bool(false)),
            _ => None,
        },
        (AttributeType::Bool, Value::Number(n)) => Some(Value::Bool(n.as_f64() != Some(0.0))),

        (AttributeType::Array, Value::Array(_)) => Some(value.clone()),
        (AttributeType::Array, Value::Null) => Some(Value::Array(Vec::new())),
        (AttributeType::Array, other) => Some(Value::Array(vec![other.clone()])),

        _ => None,
    };

    coerced.ok_or_else(|| {
        SyncError::validation(format!(
            "attribute [{attribute}]: cannot coerce {value} to {target:?}"
        ))
    })
}

fn check_require_regex(attribute: &str, pattern: &str, value: &Value) -> SyncResult<()> {
    let re = Regex::new(pattern)
        .map_err(|err| SyncError::validation(format!("invalid require_regex: {err}")))?;
    let text = value_to_string(value);
    if re.is_match(&text) {
        Ok(())
    } else {
        Err(SyncError::attribute_not_resolvable(
            attribute,
            format!("attribute [{attribute}] value [{text}] does not match required pattern"),
        ))
    }
}

fn merge_values(current: Option<&Value>, desired: &Value) -> Value {
    match (current, desired) {
        (Some(Value::Array(current)), Value::Array(desired)) => {
            let mut merged = current.clone();
            for item in desired {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Value::Array(merged)
        }
        (Some(Value::Array(current)), scalar) => {
            let mut merged = current.clone();
            if !merged.contains(scalar) {
                merged.push(scalar.clone());
            }
            Value::Array(merged)
        }
        _ => desired.clone(),
    }
}
