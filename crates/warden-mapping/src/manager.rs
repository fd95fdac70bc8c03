//! Property mapping manager.
//!
//! Holds an ordered set of compiled mapping expressions and evaluates
//! them against a per-call context.  Compilation happens once, lazily,
//! in a sandboxed Rhai engine with resource limits; evaluation clones a
//! fresh scope per mapping so expressions cannot observe each other's
//! variables.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use rhai::{Dynamic, Engine, EvalAltResult, Position, Scope, AST};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MappingError, MappingResult};

/// Maximum number of operations per expression evaluation.
const MAX_OPERATIONS: u64 = 100_000;

/// Maximum call stack depth.
const MAX_CALL_LEVELS: usize = 64;

/// Maximum string size in bytes.
const MAX_STRING_SIZE: usize = 65_536;

/// Maximum array size.
const MAX_ARRAY_SIZE: usize = 10_000;

/// Maximum map size.
const MAX_MAP_SIZE: usize = 10_000;

/// Marker payload used by the `skip_object()` control-flow signal.
const SKIP_OBJECT_SIGNAL: &str = "warden::mapping::skip_object";

/// A named, user-authored transform expression.
///
/// Evaluates to an object fragment of the provider's external schema,
/// to unit (contributes nothing), or raises `skip_object()` to exclude
/// the whole object from sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyMapping {
    pub id: Uuid,
    /// Evaluation order is name order.
    pub name: String,
    /// Identifier for built-in managed mappings, `None` for
    /// user-authored ones.
    pub managed: Option<String>,
    /// Mapping family this expression belongs to; managers only pick
    /// up mappings of their own kind.
    pub kind: String,
    /// Revision of the expression source, bumped on every edit.
    #[serde(default)]
    pub version: i32,
    /// Rhai source of the transform.
    pub expression: String,
}

impl PropertyMapping {
    /// Create a user-authored mapping.
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            managed: None,
            kind: kind.into(),
            version: 1,
            expression: expression.into(),
        }
    }
}

/// Per-call evaluation context: named variable slots visible to every
/// expression.
#[derive(Debug, Clone, Default)]
pub struct MappingContext {
    values: BTreeMap<String, serde_json::Value>,
}

impl MappingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a context variable.  The name must be one of the slots the
    /// manager was constructed with.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name)
    }
}

/// A compiled mapping: source plus its cached AST.
struct CompiledMapping {
    mapping: PropertyMapping,
    ast: AST,
}

/// Manager over an ordered collection of property mappings.
///
/// Constructed from a mapping collection filtered to one kind plus the
/// fixed set of context-variable names call sites will provide.  The
/// manager never re-orders mappings after the initial name sort;
/// evaluation order is the contract.
pub struct MappingManager {
    engine: Engine,
    mappings: Vec<PropertyMapping>,
    context_vars: Vec<String>,
    compiled: OnceLock<Result<Vec<CompiledMapping>, MappingError>>,
}

impl MappingManager {
    /// Create a manager from `mappings`, keeping only those whose kind
    /// matches `kind`, ordered by name.
    pub fn new(
        mappings: impl IntoIterator<Item = PropertyMapping>,
        kind: &str,
        context_vars: &[&str],
    ) -> Self {
        let mut mappings: Vec<PropertyMapping> =
            mappings.into_iter().filter(|m| m.kind == kind).collect();
        mappings.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            engine: build_engine(),
            mappings,
            context_vars: context_vars.iter().map(|v| (*v).to_string()).collect(),
            compiled: OnceLock::new(),
        }
    }

    /// Number of mappings this manager will evaluate.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Compile every mapping expression, binding the declared context
    /// variable names.  Deferred to first use and idempotent; calling
    /// it again is a no-op.
    pub fn compile(&self) -> MappingResult<()> {
        self.compiled_set().map(|_| ())
    }

    fn compiled_set(&self) -> MappingResult<&[CompiledMapping]> {
        let result = self.compiled.get_or_init(|| {
            // Declared variables are bound as unit so strict-variables
            // compilation can resolve them; real values arrive per call.
            let mut scope = Scope::new();
            for name in &self.context_vars {
                scope.push_dynamic(name.clone(), Dynamic::UNIT);
            }

            let mut compiled = Vec::with_capacity(self.mappings.len());
            for mapping in &self.mappings {
                let ast = self
                    .engine
                    .compile_with_scope(&scope, &mapping.expression)
                    .map_err(|e| MappingError::Compile {
                        mapping: mapping.name.clone(),
                        message: e.to_string(),
                    })?;
                compiled.push(CompiledMapping {
                    mapping: mapping.clone(),
                    ast,
                });
            }
            info!(mappings = compiled.len(), "Compiled property mappings");
            Ok(compiled)
        });

        match result {
            Ok(compiled) => Ok(compiled.as_slice()),
            Err(e) => Err(e.clone()),
        }
    }

    /// Evaluate every compiled mapping in name order against `ctx`,
    /// returning each non-unit result.
    ///
    /// An ordinary evaluation error is wrapped into
    /// [`MappingError::Evaluation`] with the offending mapping's name;
    /// the `skip_object()` signal propagates unchanged as
    /// [`MappingError::SkipObject`].
    pub fn iterate(&self, ctx: &MappingContext) -> MappingResult<Vec<serde_json::Value>> {
        let compiled = self.compiled_set()?;

        let mut base_scope = Scope::new();
        for name in &self.context_vars {
            let value = match ctx.get(name) {
                Some(v) => rhai::serde::to_dynamic(v).unwrap_or(Dynamic::UNIT),
                None => Dynamic::UNIT,
            };
            base_scope.push_dynamic(name.clone(), value);
        }

        let mut results = Vec::new();
        for entry in compiled {
            // Fresh scope per mapping so expressions are isolated.
            let mut scope = base_scope.clone();
            match self
                .engine
                .eval_ast_with_scope::<Dynamic>(&mut scope, &entry.ast)
            {
                Ok(value) => {
                    if value.is_unit() {
                        debug!(mapping = %entry.mapping.name, "Mapping contributed nothing");
                        continue;
                    }
                    let json = rhai::serde::from_dynamic::<serde_json::Value>(&value).map_err(
                        |e| MappingError::Evaluation {
                            mapping: entry.mapping.name.clone(),
                            message: format!("result not representable as JSON: {e}"),
                        },
                    )?;
                    results.push(json);
                }
                Err(e) => {
                    if is_skip_signal(&e) {
                        debug!(mapping = %entry.mapping.name, "Mapping skipped object");
                        return Err(MappingError::SkipObject);
                    }
                    warn!(
                        mapping = %entry.mapping.name,
                        error = %e,
                        "Property mapping evaluation failed"
                    );
                    return Err(MappingError::Evaluation {
                        mapping: entry.mapping.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(results)
    }
}

/// Build the sandboxed engine shared by all of a manager's mappings.
fn build_engine() -> Engine {
    let mut engine = Engine::new();

    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_string_size(MAX_STRING_SIZE);
    engine.set_max_array_size(MAX_ARRAY_SIZE);
    engine.set_max_map_size(MAX_MAP_SIZE);
    engine.set_strict_variables(true);

    engine.register_fn("skip_object", || -> Result<(), Box<EvalAltResult>> {
        Err(Box::new(EvalAltResult::ErrorRuntime(
            Dynamic::from(SKIP_OBJECT_SIGNAL.to_string()),
            Position::NONE,
        )))
    });

    engine.register_fn("log_info", |msg: &str| {
        info!(expression_log = %msg, "Mapping expression log");
    });
    engine.register_fn("log_debug", |msg: &str| {
        debug!(expression_log = %msg, "Mapping expression log");
    });

    engine
}

/// Whether the evaluation error is the skip-object control-flow signal,
/// possibly nested inside a function-call frame.
fn is_skip_signal(err: &EvalAltResult) -> bool {
    match err {
        EvalAltResult::ErrorRuntime(value, _) => value
            .clone()
            .into_string()
            .is_ok_and(|s| s == SKIP_OBJECT_SIGNAL),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => is_skip_signal(inner),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VARS: &[&str] = &["object", "provider", "connection", "creating"];

    fn manager(mappings: Vec<PropertyMapping>) -> MappingManager {
        MappingManager::new(mappings, "scim", VARS)
    }

    fn ctx() -> MappingContext {
        MappingContext::new()
            .with(
                "object",
                json!({"username": "jdoe", "email": "jdoe@example.com"}),
            )
            .with("provider", json!({"name": "test"}))
            .with("creating", json!(true))
    }

    #[test]
    fn test_iterate_in_name_order() {
        let mgr = manager(vec![
            PropertyMapping::new("20-second", "scim", r#"#{ order: "second" }"#),
            PropertyMapping::new("10-first", "scim", r#"#{ order: "first" }"#),
        ]);
        let results = mgr.iterate(&ctx()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["order"], "first");
        assert_eq!(results[1]["order"], "second");
    }

    #[test]
    fn test_kind_filter() {
        let mgr = manager(vec![
            PropertyMapping::new("a", "scim", r#"#{ x: 1 }"#),
            PropertyMapping::new("b", "ldap", r#"#{ x: 2 }"#),
        ]);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_context_variables_visible() {
        let mgr = manager(vec![PropertyMapping::new(
            "user",
            "scim",
            r#"#{ userName: object.username, active: creating }"#,
        )]);
        let results = mgr.iterate(&ctx()).unwrap();
        assert_eq!(results[0]["userName"], "jdoe");
        assert_eq!(results[0]["active"], true);
    }

    #[test]
    fn test_unit_result_contributes_nothing() {
        let mgr = manager(vec![
            PropertyMapping::new("a-empty", "scim", "()"),
            PropertyMapping::new("b-real", "scim", r#"#{ x: 1 }"#),
        ]);
        let results = mgr.iterate(&ctx()).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let mgr = manager(vec![PropertyMapping::new("a", "scim", r#"#{ x: 1 }"#)]);
        mgr.compile().unwrap();
        mgr.compile().unwrap();
        assert_eq!(mgr.iterate(&ctx()).unwrap().len(), 1);
    }

    #[test]
    fn test_compile_error_carries_identity() {
        let mgr = manager(vec![PropertyMapping::new("broken", "scim", "let x = ;")]);
        match mgr.compile() {
            Err(MappingError::Compile { mapping, .. }) => assert_eq!(mapping, "broken"),
            other => panic!("Expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn test_evaluation_error_carries_identity() {
        let mgr = manager(vec![PropertyMapping::new(
            "divide",
            "scim",
            "let x = 1 / 0; #{ x: x }",
        )]);
        match mgr.iterate(&ctx()) {
            Err(MappingError::Evaluation { mapping, .. }) => assert_eq!(mapping, "divide"),
            other => panic!("Expected evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn test_skip_object_propagates() {
        let mgr = manager(vec![
            PropertyMapping::new("10-skip", "scim", r#"if object.username == "jdoe" { skip_object(); } #{ x: 1 }"#),
            PropertyMapping::new("20-after", "scim", r#"#{ y: 2 }"#),
        ]);
        match mgr.iterate(&ctx()) {
            Err(MappingError::SkipObject) => {}
            other => panic!("Expected skip, got {other:?}"),
        }
    }

    #[test]
    fn test_scope_isolated_between_mappings() {
        let mgr = manager(vec![
            PropertyMapping::new("10-set", "scim", r#"let tmp = 1; #{ a: tmp }"#),
            // `tmp` must not leak into the second mapping's scope; with
            // strict variables this would fail compilation if shared.
            PropertyMapping::new("20-read", "scim", r#"#{ b: 2 }"#),
        ]);
        let results = mgr.iterate(&ctx()).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_runaway_expression_bounded() {
        let mgr = manager(vec![PropertyMapping::new(
            "loop",
            "scim",
            r#"let x = 0; while true { x += 1; } #{ x: x }"#,
        )]);
        match mgr.iterate(&ctx()) {
            Err(MappingError::Evaluation { mapping, .. }) => assert_eq!(mapping, "loop"),
            other => panic!("Expected bounded-operations error, got {other:?}"),
        }
    }
}
