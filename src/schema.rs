//! Declared parameter schemas and load-time validation.
//!
//! Every module declares a [`ParamSchema`]; the graph validates each parsed
//! declaration against it when loading. Violations are collected as
//! [`ValidationMessage`]s, never raised: a single invalid module does not
//! abort loading its siblings ("validate all, start only the valid").

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::config::ModuleConfig;

/// Expected shape of one parameter value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Bool,
    List,
    /// Any JSON value; only required-ness and custom validators apply.
    Any,
}

impl ParamKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Str => value.is_string(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Str => "string",
            Self::Int => "integer",
            Self::Float => "number",
            Self::Bool => "boolean",
            Self::List => "list",
            Self::Any => "any",
        };
        write!(f, "{name}")
    }
}

/// Custom per-parameter check; returns a human-readable reason on failure.
pub type ParamValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Declaration of one module parameter: required-ness, type, numeric range,
/// allowed values, and an optional custom validator.
#[derive(Clone)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    pub kind: ParamKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub allowed: Option<Vec<Value>>,
    validator: Option<ParamValidator>,
}

impl ParamSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            required: false,
            kind,
            min: None,
            max: None,
            allowed: None,
            validator: None,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn allowed(mut self, values: Vec<Value>) -> Self {
        self.allowed = Some(values);
        self
    }

    #[must_use]
    pub fn validator(
        mut self,
        check: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(check));
        self
    }

    fn check(&self, value: &Value) -> Option<String> {
        if !self.kind.matches(value) {
            return Some(format!(
                "parameter `{}` expects {}, got {value}",
                self.name, self.kind
            ));
        }
        if let Some(number) = value.as_f64() {
            if let Some(min) = self.min
                && number < min
            {
                return Some(format!(
                    "parameter `{}` is {number}, below the minimum {min}",
                    self.name
                ));
            }
            if let Some(max) = self.max
                && number > max
            {
                return Some(format!(
                    "parameter `{}` is {number}, above the maximum {max}",
                    self.name
                ));
            }
        }
        if let Some(allowed) = &self.allowed
            && !allowed.contains(value)
        {
            return Some(format!(
                "parameter `{}` must be one of {allowed:?}, got {value}",
                self.name
            ));
        }
        if let Some(validator) = &self.validator
            && let Err(reason) = validator(value)
        {
            return Some(format!("parameter `{}`: {reason}", self.name));
        }
        None
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("kind", &self.kind)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("allowed", &self.allowed)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

/// The full declared schema for one module type.
#[derive(Clone, Debug, Default)]
pub struct ParamSchema {
    specs: Vec<ParamSpec>,
}

impl ParamSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, spec: ParamSpec) -> Self {
        self.specs.push(spec);
        self
    }

    #[must_use]
    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    /// Validate a declaration against this schema, collecting every
    /// violation rather than stopping at the first.
    #[must_use]
    pub fn validate(&self, config: &ModuleConfig) -> Vec<ValidationMessage> {
        let mut messages = Vec::new();
        for spec in &self.specs {
            match config.params.get(&spec.name) {
                None if spec.required => messages.push(ValidationMessage::new(
                    &config.id,
                    &config.module_name,
                    format!("required parameter `{}` is missing", spec.name),
                )),
                None => {}
                Some(value) => {
                    if let Some(reason) = spec.check(value) {
                        messages.push(ValidationMessage::new(
                            &config.id,
                            &config.module_name,
                            reason,
                        ));
                    }
                }
            }
        }
        messages
    }
}

/// One human-readable validation finding, naming the failing module and the
/// reason. The user-visible surface of `load`/`add`/`update`: an empty list
/// means full success.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationMessage {
    pub module_id: String,
    pub module_name: String,
    pub reason: String,
}

impl ValidationMessage {
    #[must_use]
    pub fn new(
        module_id: impl Into<String>,
        module_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            module_name: module_name.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "module `{}` ({}): {}",
            self.module_id, self.module_name, self.reason
        )
    }
}
