//! Reconciliation: diffing a desired configuration against the running
//! graph so updates touch only what actually changed.
//!
//! Identity is the module `id`; equality is the declaration's canonical
//! serialized form, so both parameter and link edits count as changes.
//! Declarations absent from the desired set are removals; ids present in
//! both with differing canonical forms are restarted as stop-old/start-new.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::ModuleConfig;

/// The partition of a desired configuration against the running one.
#[derive(Clone, Debug, Default)]
pub struct GraphDiff {
    /// Declarations whose id is new; started fresh, in declared order.
    pub added: Vec<ModuleConfig>,
    /// Running declarations absent from the desired set; stopped.
    pub removed: Vec<ModuleConfig>,
    /// Desired declarations whose id is running with a different canonical
    /// form; the old instance is stopped and this one started.
    pub changed: Vec<ModuleConfig>,
}

impl GraphDiff {
    /// True when the desired configuration matches the running one exactly.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Ids of running modules that must be stopped (removed plus changed).
    #[must_use]
    pub fn ids_to_stop(&self) -> Vec<String> {
        self.removed
            .iter()
            .chain(self.changed.iter())
            .map(|entry| entry.id.clone())
            .collect()
    }

    /// Declarations to instantiate and start (added plus changed).
    #[must_use]
    pub fn entries_to_start(&self) -> Vec<ModuleConfig> {
        self.added.iter().chain(self.changed.iter()).cloned().collect()
    }
}

/// Partition `desired` against `current` into added, removed and changed
/// declarations. Declarations with equal canonical forms are untouched and
/// appear in none of the three sets.
#[must_use]
pub fn diff(current: &[ModuleConfig], desired: &[ModuleConfig]) -> GraphDiff {
    let running: FxHashMap<&str, String> = current
        .iter()
        .map(|entry| (entry.id.as_str(), entry.canonical()))
        .collect();
    let wanted: FxHashSet<&str> = desired.iter().map(|entry| entry.id.as_str()).collect();

    let mut out = GraphDiff::default();
    for entry in desired {
        match running.get(entry.id.as_str()) {
            None => out.added.push(entry.clone()),
            Some(canonical) if *canonical != entry.canonical() => out.changed.push(entry.clone()),
            Some(_) => {}
        }
    }
    for entry in current {
        if !wanted.contains(entry.id.as_str()) {
            out.removed.push(entry.clone());
        }
    }
    out
}
