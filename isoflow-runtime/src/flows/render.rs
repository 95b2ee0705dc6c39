use super::{
    describe, metrics_upload, DataAccessScope, PARAM_DATA_ACCESS, PARAM_INPUT, RESULT_KEY,
};
use crate::services::{FlowServices, SlotToken};
use anyhow::anyhow;
use async_trait::async_trait;
use isoflow_core::{
    CallbackSlot, ExecutionOutcome, FlowCallback, FlowDefinition, FlowError, FlowKind,
    MetricsUpload, ParameterMap, ReadinessReason, ResultMap, RunResult, WorkerTarget,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const API_NAME: &str = "service_on_render";

/// Construction arguments of a render request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderArgs {
    /// Slot token minted by an earlier app request.
    pub slot_token: String,
    pub width: u32,
    pub height: u32,
    pub display_id: u32,
}

/// Input record handed to the vendor's render operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderInput {
    pub width: u32,
    pub height: u32,
    pub slot_index: u32,
    pub rendering_keys: Vec<String>,
}

/// Output record the vendor service writes under [`RESULT_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOutput {
    #[serde(default)]
    pub content: String,
}

/// Payload delivered to the app: content ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSurface {
    pub html: String,
    pub width: u32,
    pub height: u32,
    pub display_id: u32,
    pub query_id: Option<i64>,
}

pub struct RenderFlow {
    args: RenderArgs,
    services: Arc<FlowServices>,
    callback: CallbackSlot<RenderedSurface>,
    started: Option<Instant>,
    token: Option<SlotToken>,
    target: Option<WorkerTarget>,
}

impl RenderFlow {
    pub fn new(
        args: RenderArgs,
        services: Arc<FlowServices>,
        callback: Box<dyn FlowCallback<RenderedSurface>>,
    ) -> Self {
        Self {
            args,
            services,
            callback: CallbackSlot::new(callback),
            started: None,
            token: None,
            target: None,
        }
    }

    fn resolve(&self) -> Result<(SlotToken, WorkerTarget), ReadinessReason> {
        let token = self
            .services
            .tokens
            .decode(&self.args.slot_token)
            .map_err(|e| {
                tracing::debug!(error = %e, "render token rejected");
                ReadinessReason::InvalidToken
            })?;
        let class = self
            .services
            .manifests
            .service_class(&token.service_package)
            .ok_or(ReadinessReason::ServiceNotFound)?;
        let target = WorkerTarget::new(token.service_package.clone(), class);
        Ok((token, target))
    }
}

#[async_trait]
impl FlowDefinition for RenderFlow {
    type Output = RenderedSurface;

    fn kind(&self) -> FlowKind {
        FlowKind::Render
    }

    async fn is_ready(&mut self) -> bool {
        self.started = Some(Instant::now());
        match self.resolve() {
            Ok((token, target)) => {
                self.token = Some(token);
                self.target = Some(target);
                true
            }
            Err(reason) => {
                self.callback.fail(FlowError::Readiness(reason).code());
                false
            }
        }
    }

    fn target_worker(&self) -> WorkerTarget {
        // resolved in is_ready, which always runs first
        self.target
            .clone()
            .unwrap_or_else(|| WorkerTarget::new("", ""))
    }

    async fn build_parameters(&mut self) -> Result<ParameterMap, FlowError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| FlowError::Parameters(anyhow!("slot token was not resolved")))?;
        let input = RenderInput {
            width: self.args.width,
            height: self.args.height,
            slot_index: token.slot_index,
            rendering_keys: token.rendering_keys.clone(),
        };
        let scope = DataAccessScope::read_only(&token.service_package);

        ParameterMap::builder()
            .record(PARAM_INPUT, &input)
            .and_then(|b| b.record(PARAM_DATA_ACCESS, &scope))
            .map(|b| b.build())
            .map_err(FlowError::Parameters)
    }

    fn upload_metrics(&self, run: &RunResult) -> Option<MetricsUpload> {
        let package = self
            .token
            .as_ref()
            .map(|t| t.service_package.as_str())
            .unwrap_or_default();
        Some(metrics_upload(
            &self.services,
            API_NAME,
            package,
            self.started,
            run,
        ))
    }

    async fn extract_result(
        &mut self,
        mut results: ResultMap,
    ) -> Result<RenderedSurface, FlowError> {
        let output: RenderOutput = results
            .take_record(RESULT_KEY)
            .map_err(FlowError::Extraction)?;
        if output.content.trim().is_empty() {
            return Err(FlowError::Extraction(anyhow!("render output has no content")));
        }
        Ok(RenderedSurface {
            html: output.content,
            width: self.args.width,
            height: self.args.height,
            display_id: self.args.display_id,
            query_id: self.token.as_ref().and_then(|t| t.query_id),
        })
    }

    fn deliver_outcome(&mut self, outcome: ExecutionOutcome<RenderedSurface>) {
        tracing::debug!(
            display_id = self.args.display_id,
            outcome = %describe(&outcome),
            "returning rendered surface"
        );
        self.callback.deliver(outcome);
    }
}
