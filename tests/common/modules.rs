//! In-repo leaf modules used by the integration tests: scripted inputs,
//! probing processors and in-memory outputs with programmable failures.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use metricloom::module::{Module, ModuleError, ModuleFactory, RunContext};
use metricloom::record::Record;
use metricloom::schema::{ParamKind, ParamSchema, ParamSpec};
use parking_lot::Mutex;
use serde_json::json;

/// Shared feed for scripted inputs; one record is emitted per poll.
pub type Feed = Arc<Mutex<VecDeque<Record>>>;

pub fn feed_of(records: Vec<Record>) -> Feed {
    Arc::new(Mutex::new(records.into()))
}

pub struct ScriptedInput {
    feed: Feed,
}

#[async_trait]
impl Module for ScriptedInput {
    async fn run(&mut self, _record: Record, _cx: RunContext) -> Result<Record, ModuleError> {
        Ok(self.feed.lock().pop_front().unwrap_or_else(Record::sentinel))
    }

    fn test_record(&self) -> Option<Record> {
        Some(Record::new("scripted").with_field("sample", json!(1)))
    }
}

pub fn scripted_input(feed: Feed) -> ModuleFactory {
    Arc::new(move |_config| Ok(Box::new(ScriptedInput { feed: feed.clone() }) as Box<dyn Module>))
}

/// Start/stop events recorded as `"start:<id>"` / `"stop:<id>"`.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// A do-nothing module that records its lifecycle calls. Usable as any
/// kind; its `run` always suppresses.
pub struct LifecycleProbe {
    id: String,
    log: EventLog,
}

#[async_trait]
impl Module for LifecycleProbe {
    async fn start(&mut self) -> Result<(), ModuleError> {
        self.log.lock().push(format!("start:{}", self.id));
        Ok(())
    }

    async fn stop(&mut self) {
        self.log.lock().push(format!("stop:{}", self.id));
    }

    async fn run(&mut self, _record: Record, _cx: RunContext) -> Result<Record, ModuleError> {
        Ok(Record::sentinel())
    }
}

pub fn lifecycle_probe(log: EventLog) -> ModuleFactory {
    Arc::new(move |config| {
        Ok(Box::new(LifecycleProbe {
            id: config.id.clone(),
            log: log.clone(),
        }) as Box<dyn Module>)
    })
}

/// Processor that tags records with its own id and logs the link each
/// delivery traveled.
pub struct LinkProbeProcessor {
    id: String,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Module for LinkProbeProcessor {
    async fn run(&mut self, record: Record, cx: RunContext) -> Result<Record, ModuleError> {
        if let Some(link) = cx.link() {
            self.seen.lock().push(link.to_string());
        }
        Ok(record.with_tag("via", json!(self.id.clone())))
    }
}

pub fn link_probe_processor(seen: Arc<Mutex<Vec<String>>>) -> ModuleFactory {
    Arc::new(move |config| {
        Ok(Box::new(LinkProbeProcessor {
            id: config.id.clone(),
            seen: seen.clone(),
        }) as Box<dyn Module>)
    })
}

/// Processor that suppresses everything.
pub struct DropAllProcessor;

#[async_trait]
impl Module for DropAllProcessor {
    async fn run(&mut self, _record: Record, _cx: RunContext) -> Result<Record, ModuleError> {
        Ok(Record::sentinel())
    }
}

pub fn drop_all_processor() -> ModuleFactory {
    Arc::new(|_config| Ok(Box::new(DropAllProcessor) as Box<dyn Module>))
}

/// Tag module returning its declared params as the computed pairs.
pub struct StampTag {
    pairs: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
impl Module for StampTag {
    async fn run(&mut self, _record: Record, _cx: RunContext) -> Result<Record, ModuleError> {
        let mut out = Record::new("stamp");
        out.fields = self.pairs.clone();
        Ok(out)
    }
}

pub fn stamp_tag() -> ModuleFactory {
    Arc::new(|config| {
        Ok(Box::new(StampTag {
            pairs: config.params.clone(),
        }) as Box<dyn Module>)
    })
}

/// One programmed failure for a [`MemoryOutput`] run call.
#[derive(Clone, Copy, Debug)]
pub enum Failure {
    Connection,
    Runtime,
}

/// Shared observable state of a [`MemoryOutput`].
#[derive(Default)]
pub struct OutputState {
    pub written: Mutex<Vec<Record>>,
    /// The link each run call arrived on, in call order.
    pub links_seen: Mutex<Vec<Option<String>>>,
    /// Outcome per upcoming run call; `None` (or exhausted) means success.
    pub plan: Mutex<VecDeque<Option<Failure>>>,
    pub start_calls: AtomicU32,
    /// `start()` fails while this is positive.
    pub start_failures: AtomicU32,
    pub stopped: AtomicBool,
}

impl OutputState {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn written_measurements(&self) -> Vec<String> {
        self.written
            .lock()
            .iter()
            .map(|record| record.measurement.clone())
            .collect()
    }

    pub fn plan_failures(&self, outcomes: Vec<Option<Failure>>) {
        *self.plan.lock() = outcomes.into();
    }
}

pub struct MemoryOutput {
    state: Arc<OutputState>,
}

#[async_trait]
impl Module for MemoryOutput {
    async fn start(&mut self) -> Result<(), ModuleError> {
        self.state.start_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.state.start_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state.start_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ModuleError::Start("sink unavailable".into()));
        }
        Ok(())
    }

    async fn stop(&mut self) {
        self.state.stopped.store(true, Ordering::SeqCst);
    }

    async fn run(&mut self, record: Record, cx: RunContext) -> Result<Record, ModuleError> {
        self.state
            .links_seen
            .lock()
            .push(cx.link().map(|link| link.to_string()));
        let programmed = self.state.plan.lock().pop_front().flatten();
        match programmed {
            Some(Failure::Connection) => Err(ModuleError::Connection("sink went away".into())),
            Some(Failure::Runtime) => Err(ModuleError::Runtime("unserializable record".into())),
            None => {
                self.state.written.lock().push(record);
                Ok(Record::sentinel())
            }
        }
    }

    fn config_record(&self) -> Option<Record> {
        Some(Record::new("memory_output").with_field(
            "written",
            json!(self.state.written.lock().len()),
        ))
    }
}

pub fn memory_output(state: Arc<OutputState>) -> ModuleFactory {
    Arc::new(move |_config| Ok(Box::new(MemoryOutput { state: state.clone() }) as Box<dyn Module>))
}

/// Output whose `run` blocks until a permit is released; lets tests pile up
/// an inbound queue deliberately.
pub struct GatedOutput {
    gate: Arc<tokio::sync::Semaphore>,
    written: Arc<AtomicU32>,
}

#[async_trait]
impl Module for GatedOutput {
    async fn run(&mut self, _record: Record, _cx: RunContext) -> Result<Record, ModuleError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ModuleError::Runtime("gate closed".into()))?;
        permit.forget();
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(Record::sentinel())
    }
}

pub fn gated_output(gate: Arc<tokio::sync::Semaphore>, written: Arc<AtomicU32>) -> ModuleFactory {
    Arc::new(move |_config| {
        Ok(Box::new(GatedOutput {
            gate: gate.clone(),
            written: written.clone(),
        }) as Box<dyn Module>)
    })
}

/// Output declaring a required `path` parameter, for schema-validation
/// coverage.
pub struct PathOutput;

#[async_trait]
impl Module for PathOutput {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().with(ParamSpec::new("path", ParamKind::Str).required())
    }

    async fn run(&mut self, _record: Record, _cx: RunContext) -> Result<Record, ModuleError> {
        Ok(Record::sentinel())
    }
}

pub fn path_output() -> ModuleFactory {
    Arc::new(|_config| Ok(Box::new(PathOutput) as Box<dyn Module>))
}

/// Module whose `start()` fails a programmed number of times (u32::MAX for
/// always) while counting attempts.
pub struct FlakyStart {
    pub attempts: Arc<AtomicU32>,
    pub failures_remaining: Arc<AtomicU32>,
}

#[async_trait]
impl Module for FlakyStart {
    async fn start(&mut self) -> Result<(), ModuleError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(ModuleError::Start("device not ready".into()));
        }
        Ok(())
    }

    async fn run(&mut self, _record: Record, _cx: RunContext) -> Result<Record, ModuleError> {
        Ok(Record::sentinel())
    }
}

impl FlakyStart {
    pub fn shared(failures: u32) -> (metricloom::module::SharedModule, Arc<AtomicU32>) {
        let attempts = Arc::new(AtomicU32::new(0));
        let module = FlakyStart {
            attempts: attempts.clone(),
            failures_remaining: Arc::new(AtomicU32::new(failures)),
        };
        (
            Arc::new(tokio::sync::Mutex::new(Box::new(module) as Box<dyn Module>)),
            attempts,
        )
    }
}
