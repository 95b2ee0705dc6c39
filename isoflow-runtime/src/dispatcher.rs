//! Single entry point that turns a request into a running flow.

use crate::executor::{ExecutionEnv, ExecutionReport, FlowExecutor};
use crate::flows::{
    AppRequestArgs, AppRequestFlow, DownloadArgs, DownloadCompleted, DownloadFlow, ExecuteResult,
    RenderArgs, RenderFlow, RenderedSurface, TriggerAck, WebTriggerArgs, WebTriggerFlow,
    WebViewArgs, WebViewFlow, WebViewResult,
};
use crate::pool::BackgroundPool;
use crate::services::FlowServices;
use crate::stats::RuntimeStats;
use isoflow_config::OrchestratorConfig;
use isoflow_core::{FlowCallback, FlowDefinition, FlowKind, FlowKindTable};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no flow can be constructed for kind {0}")]
    UnsupportedKind(FlowKind),

    #[error("arguments for {found} passed to a {expected} request")]
    KindMismatch { expected: FlowKind, found: FlowKind },
}

/// Construction arguments for each kind the dispatcher can build, paired
/// with the caller's callback.
pub enum FlowArgs {
    AppRequest {
        args: AppRequestArgs,
        callback: Box<dyn FlowCallback<ExecuteResult>>,
    },
    Render {
        args: RenderArgs,
        callback: Box<dyn FlowCallback<RenderedSurface>>,
    },
    WebTrigger {
        args: WebTriggerArgs,
        callback: Box<dyn FlowCallback<TriggerAck>>,
    },
    WebView {
        args: WebViewArgs,
        callback: Box<dyn FlowCallback<WebViewResult>>,
    },
    Download {
        args: DownloadArgs,
        callback: Box<dyn FlowCallback<DownloadCompleted>>,
    },
}

impl FlowArgs {
    pub fn app_request(
        args: AppRequestArgs,
        callback: Box<dyn FlowCallback<ExecuteResult>>,
    ) -> Self {
        FlowArgs::AppRequest { args, callback }
    }

    pub fn render(args: RenderArgs, callback: Box<dyn FlowCallback<RenderedSurface>>) -> Self {
        FlowArgs::Render { args, callback }
    }

    pub fn web_trigger(args: WebTriggerArgs, callback: Box<dyn FlowCallback<TriggerAck>>) -> Self {
        FlowArgs::WebTrigger { args, callback }
    }

    pub fn web_view(args: WebViewArgs, callback: Box<dyn FlowCallback<WebViewResult>>) -> Self {
        FlowArgs::WebView { args, callback }
    }

    pub fn download(
        args: DownloadArgs,
        callback: Box<dyn FlowCallback<DownloadCompleted>>,
    ) -> Self {
        FlowArgs::Download { args, callback }
    }

    pub fn kind(&self) -> FlowKind {
        match self {
            FlowArgs::AppRequest { .. } => FlowKind::AppRequest,
            FlowArgs::Render { .. } => FlowKind::Render,
            FlowArgs::WebTrigger { .. } => FlowKind::WebTrigger,
            FlowArgs::WebView { .. } => FlowKind::WebView,
            FlowArgs::Download { .. } => FlowKind::Download,
        }
    }
}

impl fmt::Debug for FlowArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowArgs::AppRequest { args, .. } => f.debug_tuple("AppRequest").field(args).finish(),
            FlowArgs::Render { args, .. } => f.debug_tuple("Render").field(args).finish(),
            FlowArgs::WebTrigger { args, .. } => f.debug_tuple("WebTrigger").field(args).finish(),
            FlowArgs::WebView { args, .. } => f.debug_tuple("WebView").field(args).finish(),
            FlowArgs::Download { args, .. } => f.debug_tuple("Download").field(args).finish(),
        }
    }
}

/// Handle to a scheduled flow. Dropping it does not cancel the flow.
#[derive(Debug)]
pub struct FlowTicket {
    flow_id: Uuid,
    kind: FlowKind,
    handle: JoinHandle<ExecutionReport>,
}

impl FlowTicket {
    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    /// Wait for the pipeline to finish, cleanup included.
    pub async fn report(self) -> Result<ExecutionReport, JoinError> {
        self.handle.await
    }
}

/// Builds flow definitions and submits their executors to the pool.
///
/// Holds no per-flow state; safe to share and call concurrently.
#[derive(Clone)]
pub struct FlowDispatcher {
    services: Arc<FlowServices>,
    env: ExecutionEnv,
    pool: BackgroundPool,
}

impl FlowDispatcher {
    pub fn new(services: FlowServices, kinds: FlowKindTable, pool: BackgroundPool) -> Self {
        let env = ExecutionEnv::new(services.runner.clone(), Arc::new(kinds));
        Self {
            services: Arc::new(services),
            env,
            pool,
        }
    }

    /// Dispatcher wired from configuration. Flags come from `config`,
    /// overriding whatever `services` carried.
    pub fn from_config(
        mut services: FlowServices,
        config: &OrchestratorConfig,
        pool: BackgroundPool,
    ) -> Self {
        services.flags = config.flags.clone();
        let mut dispatcher = Self::new(services, config.deadlines.kind_table(), pool);
        dispatcher.env = dispatcher
            .env
            .with_extraction_timeout(config.runtime.extraction_timeout());
        dispatcher
    }

    pub fn schedule(&self, kind: FlowKind, args: FlowArgs) -> Result<FlowTicket, DispatchError> {
        if kind == FlowKind::ExampleStore {
            tracing::error!(kind = %kind, "no flow registered for kind");
            return Err(DispatchError::UnsupportedKind(kind));
        }
        if args.kind() != kind {
            tracing::error!(
                expected = %kind,
                found = %args.kind(),
                "flow arguments do not match kind"
            );
            return Err(DispatchError::KindMismatch {
                expected: kind,
                found: args.kind(),
            });
        }

        let services = self.services.clone();
        let ticket = match args {
            FlowArgs::AppRequest { args, callback } => {
                self.submit(AppRequestFlow::new(args, services, callback))
            }
            FlowArgs::Render { args, callback } => {
                self.submit(RenderFlow::new(args, services, callback))
            }
            FlowArgs::WebTrigger { args, callback } => {
                self.submit(WebTriggerFlow::new(args, services, callback))
            }
            FlowArgs::WebView { args, callback } => {
                self.submit(WebViewFlow::new(args, services, callback))
            }
            FlowArgs::Download { args, callback } => {
                self.submit(DownloadFlow::new(args, services, callback))
            }
        };
        Ok(ticket)
    }

    fn submit<D>(&self, definition: D) -> FlowTicket
    where
        D: FlowDefinition + 'static,
    {
        let kind = definition.kind();
        let priority = self.env.kinds().descriptor(kind).priority;
        let executor = FlowExecutor::new(definition, self.env.clone());
        let flow_id = executor.flow_id();

        self.env.stats.record_scheduled();
        tracing::debug!(flow_id = %flow_id, task = %kind.task_name(), ?priority, "flow scheduled");

        FlowTicket {
            flow_id,
            kind,
            handle: self.pool.spawn(priority, executor.run()),
        }
    }

    pub fn stats(&self) -> RuntimeStats {
        self.env.stats()
    }

    pub fn kinds(&self) -> &FlowKindTable {
        self.env.kinds()
    }

    pub fn services(&self) -> &FlowServices {
        &self.services
    }
}

impl fmt::Debug for FlowDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowDispatcher")
            .field("pool", &self.pool)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
