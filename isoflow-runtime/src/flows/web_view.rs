use super::{
    describe, metrics_upload, DataAccessScope, DataPermission, PARAM_DATA_ACCESS, PARAM_INPUT,
    PARAM_MODEL_SERVICE, RESULT_KEY,
};
use crate::services::{EventRecord, FlowServices};
use async_trait::async_trait;
use isoflow_core::{
    CallbackSlot, ExecutionOutcome, FlowCallback, FlowDefinition, FlowError, FlowKind,
    MetricsUpload, ParameterMap, ReadinessReason, ResultMap, RunResult, ServiceHandle, Value,
    WorkerTarget,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const API_NAME: &str = "service_on_event";

/// Construction arguments of an event reported from a rendered surface.
#[derive(Debug, Clone, PartialEq)]
pub struct WebViewArgs {
    pub service: WorkerTarget,
    pub query_id: i64,
    /// Rows of the request log the event refers to.
    pub request_log: Option<Vec<serde_json::Value>>,
    pub event_params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EventInput {
    event_params: serde_json::Value,
    request_log: Option<Vec<serde_json::Value>>,
}

/// Event row the vendor service asks to log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub event_type: i32,
    pub row_index: i64,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Output record the vendor service writes under [`RESULT_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventOutput {
    #[serde(default)]
    pub event: Option<EventLogEntry>,
}

/// Payload delivered to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct WebViewResult {
    pub output: EventOutput,
    /// Whether the event passed validation and was persisted.
    pub event_written: bool,
}

pub struct WebViewFlow {
    args: WebViewArgs,
    services: Arc<FlowServices>,
    callback: CallbackSlot<WebViewResult>,
    started: Option<Instant>,
    model: Option<ServiceHandle>,
}

impl WebViewFlow {
    pub fn new(
        args: WebViewArgs,
        services: Arc<FlowServices>,
        callback: Box<dyn FlowCallback<WebViewResult>>,
    ) -> Self {
        Self {
            args,
            services,
            callback: CallbackSlot::new(callback),
            started: None,
            model: None,
        }
    }

    /// The event to persist, or `None` when there is nothing valid to log.
    fn loggable_event(&self, output: &EventOutput) -> Option<EventRecord> {
        let event = output.event.as_ref()?;
        let rows = self.args.request_log.as_ref()?;
        if event.event_type <= 0 || event.row_index < 0 || event.row_index >= rows.len() as i64 {
            tracing::warn!(
                service = %self.args.service,
                event_type = event.event_type,
                row_index = event.row_index,
                rows = rows.len(),
                "event row out of range, not logged"
            );
            return None;
        }
        Some(EventRecord {
            query_id: self.args.query_id,
            service_package: self.args.service.package.clone(),
            payload: serde_json::json!({
                "type": event.event_type,
                "row_index": event.row_index,
                "data": event.data,
            }),
        })
    }
}

#[async_trait]
impl FlowDefinition for WebViewFlow {
    type Output = WebViewResult;

    fn kind(&self) -> FlowKind {
        FlowKind::WebView
    }

    async fn is_ready(&mut self) -> bool {
        self.started = Some(Instant::now());
        if self.args.event_params.is_none() || self.args.service.is_blank() {
            tracing::debug!(service = %self.args.service, "web view event has no payload");
            self.callback.fail(FlowError::Readiness(ReadinessReason::InvalidArguments).code());
            return false;
        }
        true
    }

    fn target_worker(&self) -> WorkerTarget {
        self.args.service.clone()
    }

    async fn build_parameters(&mut self) -> Result<ParameterMap, FlowError> {
        let package = &self.args.service.package;
        let scope = DataAccessScope {
            service_package: package.clone(),
            local_data: DataPermission::ReadWrite,
            event_data: DataPermission::ReadOnly,
        };
        let input = EventInput {
            event_params: self.args.event_params.clone().unwrap_or_default(),
            request_log: self.args.request_log.clone(),
        };

        let model = self
            .services
            .model_service
            .bind(package)
            .await
            .map_err(FlowError::Parameters)?;
        self.model = Some(model.clone());

        let builder = ParameterMap::builder()
            .record(PARAM_INPUT, &input)
            .and_then(|b| b.record(PARAM_DATA_ACCESS, &scope))
            .map_err(FlowError::Parameters)?;
        Ok(builder.insert(PARAM_MODEL_SERVICE, Value::Service(model)).build())
    }

    fn upload_metrics(&self, run: &RunResult) -> Option<MetricsUpload> {
        Some(metrics_upload(
            &self.services,
            API_NAME,
            &self.args.service.package,
            self.started,
            run,
        ))
    }

    async fn extract_result(
        &mut self,
        mut results: ResultMap,
    ) -> Result<WebViewResult, FlowError> {
        let output: EventOutput = results
            .take_record(RESULT_KEY)
            .map_err(FlowError::Extraction)?;

        let Some(event) = self.loggable_event(&output) else {
            return Ok(WebViewResult {
                output,
                event_written: false,
            });
        };
        let store = self.services.log_store.clone();
        store
            .persist_events(vec![event])
            .await
            .map_err(FlowError::Extraction)?;

        Ok(WebViewResult {
            output,
            event_written: true,
        })
    }

    fn deliver_outcome(&mut self, outcome: ExecutionOutcome<WebViewResult>) {
        tracing::debug!(
            query_id = self.args.query_id,
            outcome = %describe(&outcome),
            "returning web view event result"
        );
        self.callback.deliver(outcome);
    }

    async fn cleanup(&mut self) {
        if let Some(model) = self.model.take() {
            if let Err(e) = self.services.model_service.unbind(model).await {
                tracing::warn!(
                    service = %self.args.service,
                    error = %e,
                    "failed to unbind model service"
                );
            }
        }
    }
}
