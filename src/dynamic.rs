//! Dynamic configuration values resolved against the in-flight record.
//!
//! Any configuration value marked dynamic may reference the current
//! record's field/tag values, or evaluate a sandboxed expression over
//! them, per invocation. This lets a processor's behavior depend on the
//! very record it is processing.
//!
//! Three forms, selected by string prefix:
//!
//! - `"field:<key>"` resolves to the record's field value under `<key>`
//! - `"tag:<key>"` resolves to the record's tag value under `<key>`
//! - `"expr:<expression>"` evaluates a sandboxed expression with
//!   `measurement`, `fields` and `tags` in scope
//!
//! Anything else resolves as a literal. An optional [`Coerce`] hint
//! converts the resolved value to the expected type.
//!
//! The expression engine is an embedded, explicitly limited evaluator:
//! expressions only (no statements or function definitions), hard caps on
//! operations, expression depth and collection sizes, and no filesystem,
//! process or network capability registered.

use miette::Diagnostic;
use rhai::{Dynamic, Engine, Scope};
use serde_json::Value;
use thiserror::Error;

use crate::record::Record;

/// Type-coercion hint applied after resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coerce {
    Str,
    Int,
    Float,
    Bool,
}

/// Errors raised while resolving a dynamic value.
#[derive(Debug, Error, Diagnostic)]
pub enum DynamicError {
    #[error("record has no {space} named `{key}`")]
    #[diagnostic(code(metricloom::dynamic::missing_reference))]
    MissingReference {
        space: &'static str,
        key: String,
    },

    #[error("cannot coerce {value} to {target:?}")]
    #[diagnostic(code(metricloom::dynamic::coercion))]
    Coercion { value: Value, target: Coerce },

    #[error("expression rejected: {0}")]
    #[diagnostic(
        code(metricloom::dynamic::expression),
        help("Expressions are evaluated in a limited sandbox; check syntax and operation count.")
    )]
    Expression(String),
}

/// A configuration value that may be literal or record-dependent.
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicValue {
    raw: Value,
}

impl DynamicValue {
    #[must_use]
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    /// The raw declared value, unresolved.
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Resolve against the given record, then apply the coercion hint.
    pub fn resolve(
        &self,
        record: &Record,
        evaluator: &ExprEvaluator,
        coerce: Option<Coerce>,
    ) -> Result<Value, DynamicError> {
        let resolved = match self.raw.as_str() {
            Some(reference) if reference.starts_with("field:") => {
                let key = &reference["field:".len()..];
                record
                    .field(key)
                    .cloned()
                    .ok_or_else(|| DynamicError::MissingReference {
                        space: "field",
                        key: key.to_string(),
                    })?
            }
            Some(reference) if reference.starts_with("tag:") => {
                let key = &reference["tag:".len()..];
                record
                    .tag(key)
                    .cloned()
                    .ok_or_else(|| DynamicError::MissingReference {
                        space: "tag",
                        key: key.to_string(),
                    })?
            }
            Some(reference) if reference.starts_with("expr:") => {
                evaluator.eval(&reference["expr:".len()..], record)?
            }
            _ => self.raw.clone(),
        };
        match coerce {
            None => Ok(resolved),
            Some(target) => coerce_value(resolved, target),
        }
    }
}

fn coerce_value(value: Value, target: Coerce) -> Result<Value, DynamicError> {
    let fail = |value: Value| DynamicError::Coercion { value, target };
    match target {
        Coerce::Str => Ok(match value {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        }),
        Coerce::Int => match &value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Value::from)
                .ok_or_else(|| fail(value.clone())),
            Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| fail(value.clone())),
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            _ => Err(fail(value)),
        },
        Coerce::Float => match &value {
            Value::Number(n) => n.as_f64().map(Value::from).ok_or_else(|| fail(value.clone())),
            Value::String(s) => s.trim().parse::<f64>().map(Value::from).map_err(|_| fail(value.clone())),
            _ => Err(fail(value)),
        },
        Coerce::Bool => match &value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) => match s.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(fail(value.clone())),
            },
            Value::Number(n) => Ok(Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
            _ => Err(fail(value)),
        },
    }
}

/// The sandboxed expression evaluator shared by dynamic values.
///
/// Construction configures hard limits; evaluation puts the record's
/// `measurement`, `fields` and `tags` into scope and accepts expressions
/// only, so user-supplied text can compute over the record but cannot run
/// statements, define functions, or reach outside the scope.
pub struct ExprEvaluator {
    engine: Engine,
}

impl ExprEvaluator {
    const MAX_OPERATIONS: u64 = 10_000;
    const MAX_EXPR_DEPTH: usize = 64;
    const MAX_STRING_SIZE: usize = 10_000;
    const MAX_COLLECTION_SIZE: usize = 1_000;

    #[must_use]
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(Self::MAX_OPERATIONS);
        engine.set_max_expr_depths(Self::MAX_EXPR_DEPTH, Self::MAX_EXPR_DEPTH);
        engine.set_max_string_size(Self::MAX_STRING_SIZE);
        engine.set_max_array_size(Self::MAX_COLLECTION_SIZE);
        engine.set_max_map_size(Self::MAX_COLLECTION_SIZE);
        Self { engine }
    }

    /// Evaluate one expression with the record in scope.
    pub fn eval(&self, expression: &str, record: &Record) -> Result<Value, DynamicError> {
        let fields = rhai::serde::to_dynamic(&record.fields)
            .map_err(|e| DynamicError::Expression(e.to_string()))?;
        let tags = rhai::serde::to_dynamic(&record.tags)
            .map_err(|e| DynamicError::Expression(e.to_string()))?;

        let mut scope = Scope::new();
        scope.push("measurement", record.measurement.clone());
        scope.push_dynamic("fields", fields);
        scope.push_dynamic("tags", tags);

        let result = self
            .engine
            .eval_expression_with_scope::<Dynamic>(&mut scope, expression)
            .map_err(|e| DynamicError::Expression(e.to_string()))?;
        rhai::serde::from_dynamic(&result).map_err(|e| DynamicError::Expression(e.to_string()))
    }

    /// Compile-check an expression without evaluating it.
    pub fn validate(&self, expression: &str) -> Result<(), DynamicError> {
        self.engine
            .compile_expression(expression)
            .map(|_| ())
            .map_err(|e| DynamicError::Expression(e.to_string()))
    }
}

impl Default for ExprEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExprEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExprEvaluator").finish()
    }
}
