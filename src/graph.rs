//! The configuration graph: building, validating, mutating and tearing
//! down the running module graph from declarative configuration text.
//!
//! One [`PipelineGraph`] exists per process. `load`, `add`, `remove` and
//! `update` serialize through a single writer lock; the dispatch path never
//! takes it. Loading follows "validate all, start only the valid": every
//! declaration is checked and every finding collected, and an invalid
//! module is skipped without aborting its siblings. `update` applies the
//! minimal stop/start set computed by [`reconcile::diff`], leaving
//! unchanged modules running with their data flow uninterrupted.
//!
//! Dependency order is inputs, then tag/variable decorators, then
//! processors, then outputs; stopping runs in reverse so producers go
//! quiet before their consumers drain.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashSet;
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use tokio::time::timeout;

use crate::backpressure::BackpressureController;
use crate::config::{ConfigError, ModuleConfig, parse_entries};
use crate::context::EngineContext;
use crate::dispatch::{LinkDispatcher, TagChild};
use crate::module::{Module, ModuleKind, SharedModule};
use crate::record::Record;
use crate::reconcile;
use crate::retry::{ActiveRetries, RetryStart};
use crate::runner::{SharedLinks, WorkerSeed, spawn_input, spawn_output, spawn_processor};
use crate::schema::ValidationMessage;

/// Hard failures of a graph operation. Per-module findings are returned as
/// [`ValidationMessage`]s instead; only unusable input is an error.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("could not read configuration file")]
    #[diagnostic(code(metricloom::graph::io))]
    Io(#[from] std::io::Error),

    #[error("no configuration has been loaded yet")]
    #[diagnostic(
        code(metricloom::graph::nothing_loaded),
        help("`restart` replays the last successful `load`; call `load` first.")
    )]
    NothingLoaded,
}

/// One validated declaration bound to its live instance and worker.
struct ModuleData {
    config: ModuleConfig,
    kind: ModuleKind,
    module: SharedModule,
    /// Outbound links as the worker sees them; pruning writes here so an
    /// evicted id disappears from a running producer immediately.
    links: SharedLinks,
    /// Consuming and input kinds own a worker; decorators run inline on the
    /// parent's records and have none.
    runner: Option<crate::runner::ModuleRunner>,
}

#[derive(Default)]
struct GraphInner {
    /// Dependency order within each applied batch.
    modules: Vec<ModuleData>,
    last_source: Option<String>,
}

/// The running module graph.
pub struct PipelineGraph {
    ctx: Arc<EngineContext>,
    dispatcher: Arc<LinkDispatcher>,
    retries: ActiveRetries,
    inner: RwLock<GraphInner>,
}

impl PipelineGraph {
    #[must_use]
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            dispatcher: Arc::new(LinkDispatcher::new()),
            retries: ActiveRetries::default(),
            inner: RwLock::new(GraphInner::default()),
        }
    }

    /// Replace the whole graph with the declarations in `text`.
    ///
    /// A previously loaded graph is stopped first. Returns every validation
    /// finding; an empty list means fully applied.
    pub async fn load(&self, text: &str) -> Result<Vec<ValidationMessage>, GraphError> {
        let entries = parse_entries(text)?;
        let mut inner = self.inner.write().await;
        if !inner.modules.is_empty() {
            tracing::info!("replacing running graph");
            self.stop_inner(&mut inner, None).await;
        }
        let messages = self.apply_batch(&mut inner, entries).await;
        inner.last_source = Some(text.to_string());
        self.sync_entries(&inner);
        tracing::info!(
            modules = inner.modules.len(),
            findings = messages.len(),
            "configuration loaded"
        );
        Ok(messages)
    }

    /// Read a configuration file and [`load`](Self::load) it.
    pub async fn load_file(
        &self,
        path: &std::path::Path,
    ) -> Result<Vec<ValidationMessage>, GraphError> {
        let text = tokio::fs::read_to_string(path).await?;
        self.load(&text).await
    }

    /// Add the declarations in `text` to the running graph.
    ///
    /// Ids colliding with running modules are rejected with a message.
    /// Links between modules of the same batch resolve after the whole
    /// batch is parsed, so forward references within it are legal.
    pub async fn add(&self, text: &str) -> Result<Vec<ValidationMessage>, GraphError> {
        let entries = parse_entries(text)?;
        let mut inner = self.inner.write().await;
        let mut messages = Vec::new();
        let running: FxHashSet<String> = inner
            .modules
            .iter()
            .map(|data| data.config.id.clone())
            .collect();
        let (fresh, collisions): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| !running.contains(&entry.id));
        for entry in collisions {
            messages.push(ValidationMessage::new(
                &entry.id,
                &entry.module_name,
                "id collides with a running module",
            ));
        }
        messages.extend(self.apply_batch(&mut inner, fresh).await);
        self.sync_entries(&inner);
        Ok(messages)
    }

    /// Stop and evict the given ids, pruning them from every remaining
    /// module's `links` so no link ever references a nonexistent id.
    pub async fn remove(&self, ids: &[String]) {
        let mut inner = self.inner.write().await;
        self.stop_inner(&mut inner, Some(ids)).await;
        prune_links(&mut inner, ids);
        self.sync_entries(&inner);
    }

    /// Reconcile the running graph against `text`, stopping only removed
    /// and changed modules and starting only added and changed ones.
    pub async fn update(&self, text: &str) -> Result<Vec<ValidationMessage>, GraphError> {
        let desired = parse_entries(text)?;
        let mut inner = self.inner.write().await;
        let current: Vec<ModuleConfig> = inner
            .modules
            .iter()
            .map(|data| data.config.clone())
            .collect();
        let diff = reconcile::diff(&current, &desired);
        if diff.is_empty() {
            tracing::debug!("update is a no-op, graph already matches");
            inner.last_source = Some(text.to_string());
            return Ok(Vec::new());
        }
        tracing::info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            "reconciling graph"
        );

        let stop_ids = diff.ids_to_stop();
        self.stop_inner(&mut inner, Some(&stop_ids)).await;
        // Only genuinely removed ids are pruned from surviving links;
        // changed ids come right back.
        let removed_ids: Vec<String> = diff.removed.iter().map(|entry| entry.id.clone()).collect();
        prune_links(&mut inner, &removed_ids);

        let messages = self.apply_batch(&mut inner, diff.entries_to_start()).await;
        inner.last_source = Some(text.to_string());
        self.sync_entries(&inner);
        Ok(messages)
    }

    /// Stop every running module in reverse dependency order. The loaded
    /// source is kept for [`restart`](Self::restart).
    pub async fn stop(&self) {
        let mut inner = self.inner.write().await;
        self.stop_inner(&mut inner, None).await;
        self.sync_entries(&inner);
    }

    /// [`stop`](Self::stop) followed by re-loading the last successfully
    /// loaded configuration text.
    pub async fn restart(&self) -> Result<Vec<ValidationMessage>, GraphError> {
        let source = self
            .inner
            .read()
            .await
            .last_source
            .clone()
            .ok_or(GraphError::NothingLoaded)?;
        self.load(&source).await
    }

    /// Ids of the running modules, in dependency order.
    pub async fn module_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .modules
            .iter()
            .map(|data| data.config.id.clone())
            .collect()
    }

    /// The running declaration for `id`, if loaded.
    pub async fn entry(&self, id: &str) -> Option<ModuleConfig> {
        self.inner
            .read()
            .await
            .modules
            .iter()
            .find(|data| data.config.id == id)
            .map(|data| data.config.clone())
    }

    /// Current inbound queue length for a consuming module.
    #[must_use]
    pub fn queue_len(&self, id: &str) -> Option<usize> {
        self.dispatcher.queue_len(id)
    }

    /// The module's representative test record, if it offers one.
    pub async fn test_record(&self, id: &str) -> Option<Record> {
        let module = self.shared_module(id).await?;
        let guard = module.lock().await;
        guard.test_record()
    }

    /// A record describing the module's live configuration, if offered.
    pub async fn config_record(&self, id: &str) -> Option<Record> {
        let module = self.shared_module(id).await?;
        let guard = module.lock().await;
        guard.config_record()
    }

    /// The retry loop currently trying to start `id`, if any.
    #[must_use]
    pub fn active_retry(&self, id: &str) -> Option<Arc<RetryStart>> {
        self.retries.lock().get(id).cloned()
    }

    async fn shared_module(&self, id: &str) -> Option<SharedModule> {
        self.inner
            .read()
            .await
            .modules
            .iter()
            .find(|data| data.config.id == id)
            .map(|data| data.module.clone())
    }

    /// Validate, instantiate, wire and start one batch of declarations.
    /// Invalid entries are skipped with a message; valid siblings proceed.
    async fn apply_batch(
        &self,
        inner: &mut GraphInner,
        entries: Vec<ModuleConfig>,
    ) -> Vec<ValidationMessage> {
        let mut messages = Vec::new();
        let mut accepted: Vec<(ModuleConfig, ModuleKind, Box<dyn Module>)> = Vec::new();
        let mut seen: FxHashSet<String> = inner
            .modules
            .iter()
            .map(|data| data.config.id.clone())
            .collect();
        let running_inputs: FxHashSet<String> = inner
            .modules
            .iter()
            .filter(|data| data.kind == ModuleKind::Input)
            .map(|data| data.config.id.clone())
            .collect();
        let batch_inputs: FxHashSet<String> = entries
            .iter()
            .filter(|entry| entry.kind() == Some(ModuleKind::Input))
            .map(|entry| entry.id.clone())
            .collect();

        for config in entries {
            let Some(kind) = config.kind() else {
                messages.push(ValidationMessage::new(
                    &config.id,
                    &config.module_name,
                    "unknown module namespace",
                ));
                continue;
            };
            if !seen.insert(config.id.clone()) {
                messages.push(ValidationMessage::new(
                    &config.id,
                    &config.module_name,
                    "duplicate module id",
                ));
                continue;
            }
            if kind.is_decorator() {
                let parent_ok = config.parent.as_deref().is_some_and(|parent| {
                    running_inputs.contains(parent) || batch_inputs.contains(parent)
                });
                if !parent_ok {
                    messages.push(ValidationMessage::new(
                        &config.id,
                        &config.module_name,
                        "tag/variable module needs an existing parent input",
                    ));
                    continue;
                }
            }
            let Some(factory) = self.ctx.factory(&config.module_name) else {
                messages.push(ValidationMessage::new(
                    &config.id,
                    &config.module_name,
                    "no module registered under this name",
                ));
                continue;
            };
            let instance = match factory(&config) {
                Ok(instance) => instance,
                Err(error) => {
                    messages.push(ValidationMessage::new(
                        &config.id,
                        &config.module_name,
                        error.to_string(),
                    ));
                    continue;
                }
            };
            let findings = instance.schema().validate(&config);
            if !findings.is_empty() {
                messages.extend(findings);
                continue;
            }
            accepted.push((config, kind, instance));
        }

        // Links may only reference surviving modules; dangling targets are
        // pruned, never fatal.
        let resolvable: FxHashSet<String> = inner
            .modules
            .iter()
            .map(|data| data.config.id.clone())
            .chain(accepted.iter().map(|(config, ..)| config.id.clone()))
            .collect();
        for (config, ..) in &mut accepted {
            let id = config.id.clone();
            let module_name = config.module_name.clone();
            config.links.retain(|target| {
                let ok = resolvable.contains(target);
                if !ok {
                    tracing::warn!(module = %id, target, "pruning link to unknown module");
                    messages.push(ValidationMessage::new(
                        &id,
                        &module_name,
                        format!("link target `{target}` does not exist, pruned"),
                    ));
                }
                ok
            });
        }

        // Producers before consumers, parents before children.
        accepted.sort_by_key(|(_, kind, _)| kind.start_rank());

        for (config, kind, instance) in accepted {
            self.activate(inner, config, kind, instance);
        }
        messages
    }

    /// Wire one validated instance into the graph: queue and route for
    /// consumers, child attachment for decorators, worker spawn, and the
    /// asynchronous first start.
    fn activate(
        &self,
        inner: &mut GraphInner,
        config: ModuleConfig,
        kind: ModuleKind,
        instance: Box<dyn Module>,
    ) {
        let limits = self.ctx.limits().clone();
        let module: SharedModule = Arc::new(tokio::sync::Mutex::new(instance));
        let links: SharedLinks = Arc::new(parking_lot::RwLock::new(config.links.clone()));
        let (started_tx, started_rx) = watch::channel(false);

        let runner = match kind {
            ModuleKind::Input => Some(spawn_input(
                self.seed(&config, &module, &links, started_rx),
                limits.input_idle_interval,
            )),
            ModuleKind::Processor => {
                let (tx, rx) = flume::bounded(limits.processor_queue_capacity);
                self.dispatcher.register_route(&config.id, tx, true, None);
                Some(spawn_processor(
                    self.seed(&config, &module, &links, started_rx),
                    rx,
                ))
            }
            ModuleKind::Output => {
                let (tx, rx) = flume::unbounded();
                let controller = Arc::new(BackpressureController::new(
                    limits.warning_limit,
                    limits.stop_limit,
                    limits.warning_interval,
                ));
                self.dispatcher
                    .register_route(&config.id, tx, false, Some(controller));
                Some(spawn_output(
                    self.seed(&config, &module, &links, started_rx),
                    rx,
                    limits.buffer_capacity,
                    limits.backoff,
                ))
            }
            ModuleKind::Tag | ModuleKind::Variable => {
                if let Some(parent) = &config.parent {
                    self.dispatcher.register_child(
                        parent,
                        TagChild {
                            id: config.id.clone(),
                            is_field: config.is_field,
                            is_tag: config.is_tag,
                            replace_existing: config.replace_existing,
                            module: module.clone(),
                        },
                    );
                }
                None
            }
        };

        // First start runs off the writer lock; a failure hands the module
        // to a background retry loop instead of aborting the batch.
        let start_module = module.clone();
        let id = config.id.clone();
        let retries = self.retries.clone();
        let run = self.ctx.run_flag();
        tokio::spawn(async move {
            let result = start_module.lock().await.start().await;
            match result {
                Ok(()) => {
                    started_tx.send_replace(true);
                }
                Err(error) => {
                    tracing::warn!(
                        module = %id,
                        %error,
                        "initial start failed, retrying in background"
                    );
                    let spawned = RetryStart::spawn(
                        id.clone(),
                        start_module,
                        limits.retry_interval,
                        limits.retry_max_attempts,
                        run,
                        started_tx,
                        retries,
                    );
                    if let Err(error) = spawned {
                        tracing::error!(module = %id, %error, "could not schedule start retries");
                    }
                }
            }
        });

        tracing::debug!(module = %config.id, %kind, "module activated");
        inner.modules.push(ModuleData {
            config,
            kind,
            module,
            links,
            runner,
        });
    }

    fn seed(
        &self,
        config: &ModuleConfig,
        module: &SharedModule,
        links: &SharedLinks,
        started: watch::Receiver<bool>,
    ) -> WorkerSeed {
        WorkerSeed {
            id: config.id.clone(),
            module: module.clone(),
            links: links.clone(),
            dispatcher: self.dispatcher.clone(),
            entries: self.ctx.entries(),
            started,
        }
    }

    /// Stop and evict modules in reverse dependency order. `ids = None`
    /// stops everything.
    async fn stop_inner(&self, inner: &mut GraphInner, ids: Option<&[String]>) {
        let selected =
            |config: &ModuleConfig| ids.is_none_or(|ids| ids.iter().any(|id| id == &config.id));
        let mut stopping: Vec<ModuleData> = Vec::new();
        let mut keep: Vec<ModuleData> = Vec::new();
        for data in inner.modules.drain(..) {
            if selected(&data.config) {
                stopping.push(data);
            } else {
                keep.push(data);
            }
        }
        inner.modules = keep;
        if stopping.is_empty() {
            return;
        }
        stopping.sort_by_key(|data| std::cmp::Reverse(data.kind.start_rank()));

        // Unroute first so in-flight dispatch drops silently, then cancel
        // any pending start retries before touching the instances.
        for data in &stopping {
            if data.kind.is_consumer() {
                self.dispatcher.unregister_route(&data.config.id);
            }
            if data.kind.is_decorator() {
                self.dispatcher.unregister_child(&data.config.id);
            }
        }
        let pending: Vec<Arc<RetryStart>> = {
            let mut retries = self.retries.lock();
            stopping
                .iter()
                .filter_map(|data| retries.remove(&data.config.id))
                .collect()
        };
        for retry in pending {
            retry.stop().await;
        }

        let stop_timeout = self.ctx.limits().stop_timeout;
        let joins = stopping.into_iter().map(|mut data| async move {
            match data.runner.take() {
                Some(mut runner) => {
                    runner.signal_shutdown();
                    if let Some(handle) = runner.take_handle()
                        && timeout(stop_timeout, handle).await.is_err()
                    {
                        tracing::warn!(
                            module = %data.config.id,
                            "worker did not stop within timeout, abandoning"
                        );
                    }
                }
                None => {
                    // Decorators have no worker; stop the instance directly.
                    let stopped = timeout(stop_timeout, async {
                        data.module.lock().await.stop().await;
                    })
                    .await;
                    if stopped.is_err() {
                        tracing::warn!(
                            module = %data.config.id,
                            "module did not stop within timeout, abandoning"
                        );
                    }
                }
            }
            tracing::debug!(module = %data.config.id, "module stopped");
        });
        futures_util::future::join_all(joins).await;
    }

    fn sync_entries(&self, inner: &GraphInner) {
        self.ctx
            .set_entries(inner.modules.iter().map(|data| data.config.clone()).collect());
    }
}

/// Strip `ids` from every remaining module's `links`, both the stored
/// declaration and the live view its worker dispatches through.
fn prune_links(inner: &mut GraphInner, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    for data in &mut inner.modules {
        data.config
            .links
            .retain(|target| !ids.iter().any(|id| id == target));
        *data.links.write() = data.config.links.clone();
    }
}
