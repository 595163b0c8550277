//! Sandboxed expression evaluation.
//!
//! Attribute `script` expressions and workflow `condition`s run in a fresh
//! rhai engine per evaluation: resource limits, strict variables, no file
//! or module access. The candidate object's data is bound as `object`;
//! beyond rhai's builtin string methods a few date predicates are
//! registered. Scripts are pure functions over the object, nothing more.

use chrono::{DateTime, Utc};
use rhai::{Dynamic, Engine, Scope};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use datum_core::{SyncError, SyncResult};

const DEFAULT_MAX_OPERATIONS: u64 = 100_000;
const DEFAULT_MAX_CALL_LEVELS: usize = 64;
const DEFAULT_MAX_STRING_SIZE: usize = 65_536;
const DEFAULT_MAX_ARRAY_SIZE: usize = 10_000;
const DEFAULT_MAX_MAP_SIZE: usize = 10_000;

/// Sandbox limits for script evaluation.
#[derive(Debug, Clone)]
pub struct ScriptEngineConfig {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptEngineConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_call_levels: DEFAULT_MAX_CALL_LEVELS,
            max_string_size: DEFAULT_MAX_STRING_SIZE,
            max_array_size: DEFAULT_MAX_ARRAY_SIZE,
            max_map_size: DEFAULT_MAX_MAP_SIZE,
        }
    }
}

/// Sandboxed evaluator for mapping scripts and workflow conditions.
///
/// A fresh engine is created per evaluation so no state leaks between
/// objects or cycles.
pub struct ScriptEngine {
    config: ScriptEngineConfig,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self {
            config: ScriptEngineConfig::default(),
        }
    }

    pub fn with_config(config: ScriptEngineConfig) -> Self {
        Self { config }
    }

    fn create_engine(&self) -> Engine {
        let mut engine = Engine::new();

        engine.set_max_operations(self.config.max_operations);
        engine.set_max_call_levels(self.config.max_call_levels);
        engine.set_max_string_size(self.config.max_string_size);
        engine.set_max_array_size(self.config.max_array_size);
        engine.set_max_map_size(self.config.max_map_size);
        engine.set_strict_variables(true);

        Self::register_helpers(&mut engine);

        engine
    }

    /// Register the helper vocabulary available to mapping scripts and
    /// workflow conditions.
    fn register_helpers(engine: &mut Engine) {
        // String concatenation, overloaded by arity
        engine.register_fn("concat", |a: &str, b: &str| format!("{a}{b}"));
        engine.register_fn("concat", |a: &str, b: &str, c: &str| format!("{a}{b}{c}"));
        engine.register_fn("concat", |a: &str, b: &str, c: &str, d: &str| {
            format!("{a}{b}{c}{d}")
        });

        // Splitting and joining
        engine.register_fn("split", |s: &str, sep: &str| -> rhai::Array {
            s.split(sep).map(|p| Dynamic::from(p.to_string())).collect()
        });
        engine.register_fn("join", |arr: rhai::Array, sep: &str| -> String {
            arr.iter()
                .map(std::string::ToString::to_string)
                .collect::<Vec<_>>()
                .join(sep)
        });

        // Case conversion
        engine.register_fn("lowercase", |s: &str| s.to_lowercase());
        engine.register_fn("uppercase", |s: &str| s.to_uppercase());
        engine.register_fn("capitalize", |s: &str| {
            let mut chars = s.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        });

        // Trimming and replacement
        engine.register_fn("trim", |s: &str| s.trim().to_string());
        engine.register_fn("replace", |s: &str, from: &str, to: &str| {
            s.replace(from, to)
        });
        engine.register_fn("substring", |s: &str, start: i64, len: i64| -> String {
            let start = start.max(0) as usize;
            let len = len.max(0) as usize;
            s.chars().skip(start).take(len).collect()
        });

        // Predicates
        engine.register_fn("starts_with", |s: &str, prefix: &str| s.starts_with(prefix));
        engine.register_fn("ends_with", |s: &str, suffix: &str| s.ends_with(suffix));
        engine.register_fn("contains_str", |s: &str, substr: &str| s.contains(substr));
        engine.register_fn("is_blank", |s: &str| s.trim().is_empty());

        // Fallbacks
        engine.register_fn("default_str", |s: &str, default: &str| -> String {
            if s.is_empty() {
                default.to_string()
            } else {
                s.to_string()
            }
        });

        fn is_empty_value(v: &Dynamic) -> bool {
            v.is_unit() || (v.is_string() && v.clone_cast::<String>().is_empty())
        }

        engine.register_fn("coalesce", |a: Dynamic, b: Dynamic| -> Dynamic {
            if is_empty_value(&a) {
                b
            } else {
                a
            }
        });
        engine.register_fn("coalesce", |a: Dynamic, b: Dynamic, c: Dynamic| -> Dynamic {
            if !is_empty_value(&a) {
                a
            } else if !is_empty_value(&b) {
                b
            } else {
                c
            }
        });

        // Array helpers
        engine.register_fn("array_first", |arr: rhai::Array| -> Dynamic {
            arr.into_iter().next().unwrap_or(Dynamic::UNIT)
        });
        engine.register_fn("array_last", |arr: rhai::Array| -> Dynamic {
            arr.into_iter().last().unwrap_or(Dynamic::UNIT)
        });
        engine.register_fn("array_unique", |arr: rhai::Array| -> rhai::Array {
            let mut seen = std::collections::HashSet::new();
            arr.into_iter()
                .filter(|v| seen.insert(v.to_string()))
                .collect()
        });

        // Conversions
        engine.register_fn("to_int", |s: &str| -> i64 { s.parse().unwrap_or(0) });
        engine.register_fn("to_bool", |s: &str| -> bool {
            matches!(s.to_lowercase().as_str(), "true" | "yes" | "1" | "on")
        });

        // Dates
        engine.register_fn("now_rfc3339", || Utc::now().to_rfc3339());
        engine.register_fn("is_past", |timestamp: &str| {
            DateTime::parse_from_rfc3339(timestamp)
                .map(|t| t.with_timezone(&Utc) < Utc::now())
                .unwrap_or(false)
        });
        engine.register_fn("is_future", |timestamp: &str| {
            DateTime::parse_from_rfc3339(timestamp)
                .map(|t| t.with_timezone(&Utc) > Utc::now())
                .unwrap_or(false)
        });

        // Logging
        engine.register_fn("log_info", |msg: &str| {
            info!(script_log = %msg, "script log");
        });
        engine.register_fn("log_warn", |msg: &str| {
            warn!(script_log = %msg, "script warning");
        });
        engine.register_fn("log_debug", |msg: &str| {
            debug!(script_log = %msg, "script debug");
        });
    }

    fn build_scope(object: &Map<String, Value>) -> SyncResult<Scope<'static>> {
        let mut scope = Scope::new();
        let object = rhai::serde::to_dynamic(object)
            .map_err(|err| SyncError::internal(format!("cannot bind object: {err}")))?;
        scope.push_constant("object", object);
        Ok(scope)
    }

    fn eval(&self, script: &str, object: &Map<String, Value>) -> SyncResult<Dynamic> {
        let engine = self.create_engine();
        let mut scope = Self::build_scope(object)?;

        let ast = engine
            .compile_with_scope(&scope, script)
            .map_err(|err| SyncError::validation(format!("script compilation failed: {err}")))?;

        engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|err| SyncError::internal(format!("script evaluation failed: {err}")))
    }

    /// Evaluate an expression to a value.
    ///
    /// A script returning unit yields `Null`.
    pub fn eval_value(&self, script: &str, object: &Map<String, Value>) -> SyncResult<Value> {
        let result = self.eval(script, object)?;
        if result.is_unit() {
            return Ok(Value::Null);
        }
        rhai::serde::from_dynamic(&result)
            .map_err(|err| SyncError::internal(format!("script result not serializable: {err}")))
    }

    /// Evaluate a condition to a boolean.
    pub fn eval_condition(&self, condition: &str, object: &Map<String, Value>) -> SyncResult<bool> {
        let result = self.eval(condition, object)?;
        result.as_bool().map_err(|actual| {
            SyncError::validation(format!(
                "condition must evaluate to a boolean, got [{actual}]"
            ))
        })
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}
