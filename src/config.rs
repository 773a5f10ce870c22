//! Declarative module configuration: the parsed form of the configuration
//! text and its canonical serialization.
//!
//! The configuration format is an ordered JSON array of module
//! declarations. Each declaration names a globally unique `id`, a
//! namespaced `module_name` type selector, module-specific `params`, the
//! downstream `links`, and (for tag/variable modules) a single parent-input
//! reference plus merge flags.
//!
//! ```json
//! [
//!   {"id": "cpu", "module_name": "inputs.cpu", "links": ["csv"]},
//!   {"id": "host", "module_name": "tags.host", "parent": "cpu", "is_tag": true},
//!   {"id": "csv", "module_name": "outputs.csv", "params": {"path": "/tmp/out.csv"}}
//! ]
//! ```

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::module::ModuleKind;

/// One parsed module declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Globally unique module id.
    pub id: String,
    /// Namespaced type selector, e.g. `"outputs.csv"`.
    pub module_name: String,
    /// Human-readable display name; defaults to the id.
    #[serde(default)]
    pub name: String,
    /// Module-kind-specific parameters, validated against the schema.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Ordered downstream module ids.
    #[serde(default)]
    pub links: Vec<String>,
    /// Tag/variable flag: merge computed pairs into `fields`.
    #[serde(default)]
    pub is_field: bool,
    /// Tag/variable flag: merge computed pairs into `tags`.
    #[serde(default)]
    pub is_tag: bool,
    /// Tag/variable flag: clear the target mapping before merging.
    #[serde(default)]
    pub replace_existing: bool,
    /// Parent input id for tag/variable modules.
    #[serde(default)]
    pub parent: Option<String>,
}

impl ModuleConfig {
    /// The module kind implied by the `module_name` namespace.
    #[must_use]
    pub fn kind(&self) -> Option<ModuleKind> {
        ModuleKind::parse(&self.module_name)
    }

    /// Look up a declared parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Canonical serialized form, used by the reconciliation diff: two
    /// declarations are "changed" exactly when their canonical forms
    /// differ (covers both parameters and links).
    #[must_use]
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Failure to parse the configuration text itself. Parse failures are hard
/// errors; per-module validation findings are collected messages instead.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("configuration text is not a valid module list: {0}")]
    #[diagnostic(
        code(metricloom::config::parse),
        help("The configuration format is a JSON array of module declarations.")
    )]
    Parse(#[from] serde_json::Error),
}

/// Parse an ordered list of module declarations from configuration text.
pub fn parse_entries(text: &str) -> Result<Vec<ModuleConfig>, ConfigError> {
    let mut entries: Vec<ModuleConfig> = serde_json::from_str(text)?;
    for entry in &mut entries {
        if entry.name.is_empty() {
            entry.name = entry.id.clone();
        }
    }
    Ok(entries)
}
