//! The explicit engine context: module registry, process-wide run flag and
//! tunable limits, passed to components instead of ambient global state.
//!
//! One [`EngineContext`] exists per running process. It is built once at
//! bootstrap (the excluded CLI/bootstrap collaborator registers module
//! factories and supplies limit overrides) and torn down by
//! [`shutdown`](EngineContext::shutdown), which clears the run flag polled
//! cooperatively by retry loops and long-running module loops.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::watch;

use crate::buffer::BackoffPolicy;
use crate::config::ModuleConfig;
use crate::module::{ModuleFactory, SharedEntries};

/// Tunable limits governing queues, buffering, retries and shutdown.
#[derive(Clone, Debug)]
pub struct EngineLimits {
    /// Output queue length above which a rate-limited warning is logged.
    pub warning_limit: usize,
    /// Output queue length above which incoming items are dropped.
    pub stop_limit: usize,
    /// Minimum gap between two backlog warnings for the same output.
    pub warning_interval: Duration,
    /// Capacity of a processor's inbound queue; producers block past it.
    pub processor_queue_capacity: usize,
    /// Capacity of each output's failure-replay buffer.
    pub buffer_capacity: usize,
    /// Reconnection backoff for network-backed outputs.
    pub backoff: BackoffPolicy,
    /// Sleep between background start attempts.
    pub retry_interval: Duration,
    /// Start attempt budget; `None` retries unbounded.
    pub retry_max_attempts: Option<u32>,
    /// Bound on joining a module's worker during stop; workers that do not
    /// terminate within it are abandoned, never force-killed.
    pub stop_timeout: Duration,
    /// Sleep applied by input loops when a poll produced nothing.
    pub input_idle_interval: Duration,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            warning_limit: 100,
            stop_limit: 500,
            warning_interval: Duration::from_secs(30),
            processor_queue_capacity: 64,
            buffer_capacity: 1_000,
            backoff: BackoffPolicy::default(),
            retry_interval: Duration::from_secs(10),
            retry_max_attempts: None,
            stop_timeout: Duration::from_secs(5),
            input_idle_interval: Duration::from_millis(10),
        }
    }
}

impl EngineLimits {
    /// Defaults overlaid with `METRICLOOM_*` environment variables
    /// (`.env` honored).
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut limits = Self::default();
        if let Some(value) = env_usize("METRICLOOM_WARNING_LIMIT") {
            limits.warning_limit = value;
        }
        if let Some(value) = env_usize("METRICLOOM_STOP_LIMIT") {
            limits.stop_limit = value;
        }
        if let Some(value) = env_usize("METRICLOOM_PROCESSOR_QUEUE_CAPACITY") {
            limits.processor_queue_capacity = value;
        }
        if let Some(value) = env_usize("METRICLOOM_BUFFER_CAPACITY") {
            limits.buffer_capacity = value;
        }
        if let Some(value) = env_secs("METRICLOOM_RETRY_INTERVAL_SECS") {
            limits.retry_interval = value;
        }
        if let Some(value) = env_secs("METRICLOOM_STOP_TIMEOUT_SECS") {
            limits.stop_timeout = value;
        }
        limits
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_secs(key: &str) -> Option<Duration> {
    let secs: u64 = std::env::var(key).ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(secs))
}

/// Process-wide engine state shared by the graph and its workers.
pub struct EngineContext {
    registry: FxHashMap<String, ModuleFactory>,
    limits: EngineLimits,
    run: watch::Sender<bool>,
    entries: SharedEntries,
}

impl EngineContext {
    #[must_use]
    pub fn builder() -> EngineContextBuilder {
        EngineContextBuilder::default()
    }

    /// Look up the factory registered for a namespaced module name.
    #[must_use]
    pub fn factory(&self, module_name: &str) -> Option<ModuleFactory> {
        self.registry.get(module_name).cloned()
    }

    /// Registered module names, for the list-modules surface.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.registry.keys().cloned().collect()
    }

    #[must_use]
    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    /// A receiver for the process-wide run flag. Long-running loops poll
    /// this cooperatively.
    #[must_use]
    pub fn run_flag(&self) -> watch::Receiver<bool> {
        self.run.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.run.borrow()
    }

    /// Clear the run flag. Retry loops and module loops observe this and
    /// wind down; the graph's `stop()` handles the workers.
    pub fn shutdown(&self) {
        self.run.send_replace(false);
    }

    /// Shared handle to the raw parsed configuration entries.
    #[must_use]
    pub fn entries(&self) -> SharedEntries {
        self.entries.clone()
    }

    /// Replace the raw entry snapshot after a graph mutation.
    pub(crate) fn set_entries(&self, entries: Vec<ModuleConfig>) {
        *self.entries.write() = entries;
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("modules", &self.registry.len())
            .field("limits", &self.limits)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Builder for [`EngineContext`].
#[derive(Default)]
pub struct EngineContextBuilder {
    registry: FxHashMap<String, ModuleFactory>,
    limits: Option<EngineLimits>,
}

impl EngineContextBuilder {
    /// Register a module factory under its namespaced name.
    #[must_use]
    pub fn register(mut self, module_name: impl Into<String>, factory: ModuleFactory) -> Self {
        self.registry.insert(module_name.into(), factory);
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: EngineLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<EngineContext> {
        let (run, _) = watch::channel(true);
        Arc::new(EngineContext {
            registry: self.registry,
            limits: self.limits.unwrap_or_default(),
            run,
            entries: Arc::new(parking_lot::RwLock::new(Vec::new())),
        })
    }
}
