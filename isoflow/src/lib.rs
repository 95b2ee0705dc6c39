//! # Isoflow
//!
//! Dispatches requests to vendor-supplied services running in isolated
//! workers, bounds every run by a deadline, and always hands the worker
//! back, whatever happened.
//!
//! ## Features
//!
//! - `runtime` (default): executor, deadline scheduler, dispatcher and the built-in flows
//! - `sandbox` (default): in-process worker runners
//! - `config`: YAML/JSON configuration loading
//! - `logger`: tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use isoflow::prelude::*;
//! use isoflow::runtime::flows::RenderArgs;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = Arc::new(InprocRunner::new());
//!     let services = FlowServices::builder(runner).build();
//!     let dispatcher = FlowDispatcher::from_config(
//!         services,
//!         &OrchestratorConfig::default(),
//!         BackgroundPool::current(None)?,
//!     );
//!
//!     let (callback, outcome) = channel();
//!     let args = RenderArgs { slot_token: "...".into(), width: 100, height: 50, display_id: 0 };
//!     dispatcher.schedule(FlowKind::Render, FlowArgs::render(args, callback))?;
//!     println!("{:?}", outcome.await?);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use isoflow_context as context;
pub use isoflow_core::*;

#[cfg(feature = "config")]
#[cfg_attr(docsrs, doc(cfg(feature = "config")))]
pub use isoflow_config as config;

#[cfg(feature = "logger")]
#[cfg_attr(docsrs, doc(cfg(feature = "logger")))]
pub use isoflow_logger as logger;

#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub use isoflow_runtime as runtime;

#[cfg(feature = "sandbox")]
#[cfg_attr(docsrs, doc(cfg(feature = "sandbox")))]
pub use isoflow_sandbox as sandbox;

/// Prelude module for easy imports
pub mod prelude {
    pub use isoflow_context::FlowTrace;
    pub use isoflow_core::prelude::*;
    pub use isoflow_core::{channel, FnCallback};
    pub use std::sync::Arc;

    #[cfg(feature = "config")]
    pub use isoflow_config::{ConfigLoader, OrchestratorConfig};

    #[cfg(feature = "logger")]
    pub use isoflow_logger::Logger;

    #[cfg(feature = "runtime")]
    #[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
    pub use isoflow_runtime::{
        BackgroundPool, DispatchError, ExecutionReport, FlowArgs, FlowDispatcher, FlowServices,
        FlowTicket, OutcomeSummary, RuntimeStats, StaticManifest,
    };

    #[cfg(feature = "sandbox")]
    #[cfg_attr(docsrs, doc(cfg(feature = "sandbox")))]
    pub use isoflow_sandbox::{service_fn, InprocRunner, SerializedRunner};
}
