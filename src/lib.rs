//! # Metricloom: Live-reconfigurable Data Pipeline Engine
//!
//! Metricloom runs a user-declared graph of pluggable modules: inputs that
//! produce measurements, processors and taggers that transform or annotate
//! them, outputs that persist them. The engine instantiates, links, runs
//! and reconfigures this graph live, at process runtime, without a full
//! restart.
//!
//! ## Core Concepts
//!
//! - **Records**: The unit of data flow, a measurement with ordered fields
//!   and tags plus a timestamp
//! - **Modules**: Async units of work satisfying the start/stop/run
//!   capability set, in five kinds
//! - **Graph**: Declarative configuration compiled into running workers
//!   with explicit links
//! - **Reconciliation**: Minimal-diff updates that stop and start only the
//!   modules that changed
//! - **Resilience**: Background start retries, failure buffering with
//!   replay, and output backpressure
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use metricloom::context::EngineContext;
//! use metricloom::graph::PipelineGraph;
//! use metricloom::module::{Module, ModuleError, RunContext};
//! use metricloom::record::Record;
//! use async_trait::async_trait;
//!
//! struct Heartbeat;
//!
//! #[async_trait]
//! impl Module for Heartbeat {
//!     async fn run(&mut self, _record: Record, _cx: RunContext) -> Result<Record, ModuleError> {
//!         Ok(Record::new("heartbeat").with_field("alive", serde_json::json!(true)))
//!     }
//! }
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = EngineContext::builder()
//!     .register("inputs.heartbeat", Arc::new(|_| Ok(Box::new(Heartbeat) as Box<dyn Module>)))
//!     .build();
//! let graph = PipelineGraph::new(ctx);
//! let messages = graph
//!     .load(r#"[{"id": "beat", "module_name": "inputs.heartbeat"}]"#)
//!     .await?;
//! assert!(messages.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`record`] - The data model and the suppression sentinel
//! - [`module`] - The module contract, kinds and per-invocation context
//! - [`config`] - Declarative module configuration and parsing
//! - [`schema`] - Declared parameter schemas and load-time validation
//! - [`dynamic`] - Per-record dynamic parameter resolution
//! - [`graph`] - The configuration graph and its mutation operations
//! - [`reconcile`] - Diffing desired configuration against the running graph
//! - [`dispatch`] - Link routing and tag-child decoration
//! - [`backpressure`] - Output queue limits and the drop policy
//! - [`buffer`] - Failure buffering and reconnection backoff
//! - [`retry`] - Background start retries
//! - [`context`] - The engine context, registry and tunable limits
//! - [`telemetry`] - Tracing bootstrap

pub mod backpressure;
pub mod buffer;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod dynamic;
pub mod graph;
pub mod module;
pub mod reconcile;
pub mod record;
pub mod retry;
mod runner;
pub mod schema;
pub mod telemetry;
