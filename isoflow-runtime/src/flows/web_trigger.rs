use super::{
    check_manifest, describe, metrics_upload, DataAccessScope, PARAM_DATA_ACCESS, PARAM_INPUT,
    RESULT_KEY,
};
use crate::services::{EventRecord, FlowServices, RequestLogRecord};
use async_trait::async_trait;
use isoflow_core::{
    CallbackSlot, ExecutionOutcome, FlowCallback, FlowDefinition, FlowError, FlowKind,
    MetricsUpload, ParameterMap, ReadinessReason, ResultMap, RunResult, WorkerTarget,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const API_NAME: &str = "service_on_web_trigger";

/// Construction arguments of a web trigger registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebTriggerArgs {
    pub destination_url: String,
    pub app_package: String,
    pub service: WorkerTarget,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WebTriggerInput {
    destination_url: String,
    app_package: String,
    payload: Vec<u8>,
}

/// Output record the vendor service writes under [`RESULT_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebTriggerOutput {
    #[serde(default)]
    pub request_log: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

/// Payload delivered to the caller once the logs are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerAck {
    pub query_id: Option<i64>,
    pub events_written: usize,
}

pub struct WebTriggerFlow {
    args: WebTriggerArgs,
    services: Arc<FlowServices>,
    callback: CallbackSlot<TriggerAck>,
    started: Option<Instant>,
}

impl WebTriggerFlow {
    pub fn new(
        args: WebTriggerArgs,
        services: Arc<FlowServices>,
        callback: Box<dyn FlowCallback<TriggerAck>>,
    ) -> Self {
        Self {
            args,
            services,
            callback: CallbackSlot::new(callback),
            started: None,
        }
    }

    fn readiness(&self) -> Result<(), ReadinessReason> {
        let flags = &self.services.flags;
        if flags.global_kill_switch {
            return Err(ReadinessReason::KillSwitch);
        }
        if !flags.measurement_enabled {
            return Err(ReadinessReason::PersonalizationDisabled);
        }
        if self.args.destination_url.trim().is_empty()
            || self.args.app_package.trim().is_empty()
            || self.args.service.is_blank()
        {
            return Err(ReadinessReason::InvalidArguments);
        }
        check_manifest(self.services.manifests.as_ref(), &self.args.service)
    }
}

#[async_trait]
impl FlowDefinition for WebTriggerFlow {
    type Output = TriggerAck;

    fn kind(&self) -> FlowKind {
        FlowKind::WebTrigger
    }

    async fn is_ready(&mut self) -> bool {
        self.started = Some(Instant::now());
        match self.readiness() {
            Ok(()) => true,
            Err(reason) => {
                tracing::info!(service = %self.args.service, %reason, "web trigger rejected");
                self.callback.fail(FlowError::Readiness(reason).code());
                false
            }
        }
    }

    fn target_worker(&self) -> WorkerTarget {
        self.args.service.clone()
    }

    async fn build_parameters(&mut self) -> Result<ParameterMap, FlowError> {
        let input = WebTriggerInput {
            destination_url: self.args.destination_url.clone(),
            app_package: self.args.app_package.clone(),
            payload: self.args.payload.clone(),
        };
        let scope = DataAccessScope::read_only(&self.args.service.package);
        ParameterMap::builder()
            .record(PARAM_INPUT, &input)
            .and_then(|b| b.record(PARAM_DATA_ACCESS, &scope))
            .map(|b| b.build())
            .map_err(FlowError::Parameters)
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

    async fn extract_result(&mut self, mut results: ResultMap) -> Result<TriggerAck, FlowError> {
        let output: WebTriggerOutput = results
            .take_record(RESULT_KEY)
            .map_err(FlowError::Extraction)?;
        let package = self.args.service.package.clone();
        let store = self.services.log_store.clone();

        let Some(rows) = output.request_log else {
            return Ok(TriggerAck {
                query_id: None,
                events_written: 0,
            });
        };
        let query_id = store
            .persist_request(RequestLogRecord {
                service_package: package.clone(),
                task_name: FlowKind::WebTrigger.task_name().to_string(),
                rows,
            })
            .await
            .map_err(FlowError::Extraction)?;

        let events: Vec<EventRecord> = output
            .events
            .into_iter()
            .map(|payload| EventRecord {
                query_id,
                service_package: package.clone(),
                payload,
            })
            .collect();
        let events_written = events.len();
        if !events.is_empty() {
            store
                .persist_events(events)
                .await
                .map_err(FlowError::Extraction)?;
        }

        Ok(TriggerAck {
            query_id: Some(query_id),
            events_written,
        })
    }

    fn deliver_outcome(&mut self, outcome: ExecutionOutcome<TriggerAck>) {
        tracing::debug!(
            destination = %self.args.destination_url,
            outcome = %describe(&outcome),
            "returning web trigger result"
        );
        self.callback.deliver(outcome);
    }
}
