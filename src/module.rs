//! The module contract: the capability interface every pluggable unit
//! satisfies, plus the kind taxonomy and per-invocation context.
//!
//! Modules come in five kinds (input, processor, output, tag, variable)
//! that share the same capability set `{start, stop, run}` rather than a
//! common base implementation. The engine dispatches by [`ModuleKind`] and
//! talks to every instance through the [`Module`] trait object.
//!
//! # Run semantics by kind
//!
//! - **Input**: driven with a sentinel argument; returns a produced record,
//!   or the sentinel when nothing is available right now.
//! - **Processor**: transforms the inbound record; returning the sentinel
//!   suppresses forwarding.
//! - **Output**: persists the inbound record; the return value is ignored
//!   (convention: return the sentinel).
//! - **Tag / Variable**: receives the parent input's in-flight record and
//!   returns the computed key -> value pairs as the result's `fields`; the
//!   engine merges them into the parent record per the declared flags.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::config::ModuleConfig;
use crate::record::Record;
use crate::schema::ParamSchema;

/// The kind of a module, parsed from the namespaced `module_name` prefix
/// (`inputs.x`, `processors.y`, `outputs.z`, `tags.t`, `variables.v`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Produces records from its own acquisition loop.
    Input,
    /// Consumes from an inbound queue, transforms, forwards.
    Processor,
    /// Consumes from an inbound queue and persists; a sink, never forwards.
    Output,
    /// Decorates a parent input's records with computed tags/fields.
    Tag,
    /// Like [`Tag`](Self::Tag), but computes derived values per record.
    Variable,
}

impl ModuleKind {
    /// Parse the kind from a namespaced module name.
    #[must_use]
    pub fn parse(module_name: &str) -> Option<Self> {
        let namespace = module_name.split('.').next()?;
        match namespace {
            "inputs" => Some(Self::Input),
            "processors" => Some(Self::Processor),
            "outputs" => Some(Self::Output),
            "tags" => Some(Self::Tag),
            "variables" => Some(Self::Variable),
            _ => None,
        }
    }

    /// Rank in dependency order: producers before consumers, parents before
    /// children. Instantiation and start run ascending; stop runs descending.
    #[must_use]
    pub fn start_rank(&self) -> u8 {
        match self {
            Self::Input => 0,
            Self::Tag | Self::Variable => 1,
            Self::Processor => 2,
            Self::Output => 3,
        }
    }

    /// Whether this kind consumes from a dedicated inbound queue.
    #[must_use]
    pub fn is_consumer(&self) -> bool {
        matches!(self, Self::Processor | Self::Output)
    }

    /// Whether this kind runs attached to a parent input.
    #[must_use]
    pub fn is_decorator(&self) -> bool {
        matches!(self, Self::Tag | Self::Variable)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Processor => write!(f, "processor"),
            Self::Output => write!(f, "output"),
            Self::Tag => write!(f, "tag"),
            Self::Variable => write!(f, "variable"),
        }
    }
}

/// Provenance of one delivery: the directed edge it traveled.
///
/// Passed alongside every dispatched record so a consumer fed by multiple
/// producers can tell which upstream link a given call originated from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Link {
    /// Id of the module that produced the record.
    pub producer: String,
    /// Id of the module receiving the record.
    pub consumer: String,
}

impl Link {
    #[must_use]
    pub fn new(producer: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            consumer: consumer.into(),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.producer, self.consumer)
    }
}

/// Shared, read-only view of the raw parsed configuration entries.
///
/// Some modules introspect the graph, e.g. to discover their own upstream
/// predecessors; they get the declarations, never live instances.
pub type SharedEntries = Arc<parking_lot::RwLock<Vec<ModuleConfig>>>;

/// Per-invocation context handed to [`Module::run`].
#[derive(Clone)]
pub struct RunContext {
    link: Option<Link>,
    entries: SharedEntries,
}

impl RunContext {
    /// Context for an input acquisition call (no inbound link).
    #[must_use]
    pub fn source(entries: SharedEntries) -> Self {
        Self {
            link: None,
            entries,
        }
    }

    /// Context for a delivery that traveled the given link.
    #[must_use]
    pub fn delivery(link: Link, entries: SharedEntries) -> Self {
        Self {
            link: Some(link),
            entries,
        }
    }

    /// The `(producer, consumer)` edge this invocation originated from,
    /// if any.
    #[must_use]
    pub fn link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    /// Snapshot of the raw configuration entries currently loaded.
    #[must_use]
    pub fn entries(&self) -> Vec<ModuleConfig> {
        self.entries.read().clone()
    }

    /// Ids of modules that list `id` among their links (upstream producers).
    #[must_use]
    pub fn upstream_of(&self, id: &str) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.links.iter().any(|target| target == id))
            .map(|entry| entry.id.clone())
            .collect()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext").field("link", &self.link).finish()
    }
}

/// Failures a module can raise. The variant decides the engine's reaction:
/// [`Connection`](ModuleError::Connection) failures are transient and
/// replayable, [`Runtime`](ModuleError::Runtime) failures are per-record
/// and never replayed, [`Start`](ModuleError::Start) failures route to the
/// retry-start subsystem.
#[derive(Debug, Error, Diagnostic)]
pub enum ModuleError {
    /// Transient connectivity failure; the record is buffered for replay
    /// once the connection is restored.
    #[error("connection failure: {0}")]
    #[diagnostic(code(metricloom::module::connection))]
    Connection(String),

    /// Processing or serialization failure for this record; logged and
    /// never replayed.
    #[error("runtime failure: {0}")]
    #[diagnostic(code(metricloom::module::runtime))]
    Runtime(String),

    /// `start()` could not bring the module up.
    #[error("start failed: {0}")]
    #[diagnostic(
        code(metricloom::module::start),
        help("Start failures are retried in the background; check the module's connectivity.")
    )]
    Start(String),

    /// The declared parameters could not be turned into an instance.
    #[error("configuration rejected: {0}")]
    #[diagnostic(code(metricloom::module::config))]
    Config(String),
}

impl ModuleError {
    /// Whether a failed persist is eligible for replay after reconnecting.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// The capability set every pluggable module satisfies.
///
/// Instances are owned exclusively by their runner and accessed behind a
/// lock, so methods take `&mut self`.
#[async_trait]
pub trait Module: Send {
    /// The declared parameter schema this module validates against at load.
    fn schema(&self) -> ParamSchema {
        ParamSchema::default()
    }

    /// Bring the module up (open connections, files, devices).
    ///
    /// Failures never abort the graph; they are retried in the background.
    async fn start(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Tear the module down. Best-effort; must not block indefinitely.
    async fn stop(&mut self) {}

    /// Execute one invocation; see the module-level docs for the per-kind
    /// semantics of the argument and the returned record.
    async fn run(&mut self, record: Record, cx: RunContext) -> Result<Record, ModuleError>;

    /// A representative record for test mode, if the module offers one.
    fn test_record(&self) -> Option<Record> {
        None
    }

    /// A record describing the module's live configuration, if offered.
    fn config_record(&self) -> Option<Record> {
        None
    }
}

/// A module instance shared between its worker, the graph, and (while its
/// start is failing) a retry-start task.
pub type SharedModule = Arc<tokio::sync::Mutex<Box<dyn Module>>>;

/// Constructor registered per `module_name`; the excluded plugin-discovery
/// collaborator populates the registry with these.
pub type ModuleFactory =
    Arc<dyn Fn(&ModuleConfig) -> Result<Box<dyn Module>, ModuleError> + Send + Sync>;
