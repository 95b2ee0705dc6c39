//! # Isoflow Runtime
//!
//! Executes flow definitions against sandboxed workers: the per-flow
//! executor, deadline enforcement, the shared background pool and the
//! dispatcher that ties them together.

pub mod deadline;
pub mod dispatcher;
pub mod executor;
pub mod flows;
pub mod pool;
pub mod services;
mod stats;

pub use deadline::DeadlineScheduler;
pub use dispatcher::{DispatchError, FlowArgs, FlowDispatcher, FlowTicket};
pub use executor::{ExecutionEnv, ExecutionReport, FlowExecutor, OutcomeSummary, WorkerLease};
pub use pool::{BackgroundPool, GatePermit, PriorityGate};
pub use services::{
    ApiCallStats, FlowServices, FlowServicesBuilder, InMemoryLogStore, InMemoryVendorDataStore,
    JsonTokenCodec, LogStore, ManifestResolver, MetricsSink, ModelServiceProvider,
    NoopModelService, SlotToken, StaticManifest, TokenCodec, TracingMetricsSink, VendorDataRow,
    VendorDataStore,
};
pub use stats::RuntimeStats;
