use super::{
    check_manifest, describe, metrics_upload, DataAccessScope, DataPermission, PARAM_DATA_ACCESS,
    PARAM_INPUT, PARAM_MODEL_SERVICE, RESULT_KEY,
};
use crate::services::{FlowServices, RequestLogRecord, SlotToken};
use anyhow::anyhow;
use async_trait::async_trait;
use isoflow_core::{
    CallbackSlot, ExecutionOutcome, FlowCallback, FlowDefinition, FlowError, FlowKind,
    MetricsUpload, ParameterMap, ReadinessReason, ResultMap, RunResult, ServiceHandle,
    WorkerTarget,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const API_NAME: &str = "service_on_execute";

/// Construction arguments of an app request.
#[derive(Debug, Clone, PartialEq)]
pub struct AppRequestArgs {
    pub calling_package: String,
    pub service: WorkerTarget,
    /// Serialized app parameters; `None` when the caller sent none.
    pub app_params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ExecuteInput {
    app_package: String,
    app_params: serde_json::Value,
}

/// Output record the vendor service writes under [`RESULT_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOutput {
    #[serde(default)]
    pub rendering_keys: Vec<String>,
    #[serde(default)]
    pub request_log: Vec<serde_json::Value>,
    #[serde(default)]
    pub best_value: Option<i64>,
}

/// Payload delivered to the app.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteResult {
    pub query_id: Option<i64>,
    /// Present when targeting is enabled and the service asked for rendering.
    pub slot_token: Option<String>,
    pub output: ExecuteOutput,
}

pub struct AppRequestFlow {
    args: AppRequestArgs,
    services: Arc<FlowServices>,
    callback: CallbackSlot<ExecuteResult>,
    started: Option<Instant>,
    model: Option<ServiceHandle>,
}

impl AppRequestFlow {
    pub fn new(
        args: AppRequestArgs,
        services: Arc<FlowServices>,
        callback: Box<dyn FlowCallback<ExecuteResult>>,
    ) -> Self {
        Self {
            args,
            services,
            callback: CallbackSlot::new(callback),
            started: None,
            model: None,
        }
    }

    fn readiness(&self) -> Result<(), ReadinessReason> {
        if self.services.flags.global_kill_switch {
            return Err(ReadinessReason::KillSwitch);
        }
        if self.args.app_params.is_none() || self.args.service.is_blank() {
            return Err(ReadinessReason::InvalidArguments);
        }
        check_manifest(self.services.manifests.as_ref(), &self.args.service)
    }

    fn validate(&self, output: &ExecuteOutput) -> Result<(), FlowError> {
        if !self.services.flags.validate_output {
            return Ok(());
        }
        if let Some(key) = output.rendering_keys.iter().find(|k| k.trim().is_empty()) {
            return Err(FlowError::Extraction(anyhow!(
                "rendering key '{key}' is not a valid vendor data key"
            )));
        }
        Ok(())
    }

    fn mint_token(
        &self,
        query_id: Option<i64>,
        output: &ExecuteOutput,
    ) -> Result<Option<String>, FlowError> {
        if !self.services.flags.targeting_enabled || output.rendering_keys.is_empty() {
            return Ok(None);
        }
        let token = SlotToken {
            query_id,
            service_package: self.args.service.package.clone(),
            slot_index: 0,
            rendering_keys: output.rendering_keys.clone(),
        };
        self.services
            .tokens
            .encode(&token)
            .map(Some)
            .map_err(FlowError::Extraction)
    }
}

#[async_trait]
impl FlowDefinition for AppRequestFlow {
    type Output = ExecuteResult;

    fn kind(&self) -> FlowKind {
        FlowKind::AppRequest
    }

    async fn is_ready(&mut self) -> bool {
        self.started = Some(Instant::now());
        match self.readiness() {
            Ok(()) => true,
            Err(reason) => {
                tracing::info!(
                    caller = %self.args.calling_package,
                    service = %self.args.service,
                    %reason,
                    "app request rejected"
                );
                self.callback.fail(FlowError::Readiness(reason).code());
                false
            }
        }
    }

    fn target_worker(&self) -> WorkerTarget {
        self.args.service.clone()
    }

    async fn build_parameters(&mut self) -> Result<ParameterMap, FlowError> {
        let package = &self.args.service.package;
        let local_data = if self.services.flags.measurement_enabled {
            DataPermission::ReadWrite
        } else {
            DataPermission::ReadOnly
        };
        let scope = DataAccessScope {
            service_package: package.clone(),
            local_data,
            event_data: DataPermission::ReadOnly,
        };
        let input = ExecuteInput {
            app_package: self.args.calling_package.clone(),
            app_params: self.args.app_params.clone().unwrap_or_default(),
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
        Ok(builder
            .insert(PARAM_MODEL_SERVICE, isoflow_core::Value::Service(model))
            .build())
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

    async fn extract_result(&mut self, mut results: ResultMap) -> Result<ExecuteResult, FlowError> {
        let output: ExecuteOutput = results
            .take_record(RESULT_KEY)
            .map_err(FlowError::Extraction)?;
        self.validate(&output)?;
        let query_id = log_query(&self.services, &self.args.service.package, &output).await?;
        let slot_token = self.mint_token(query_id, &output)?;
        Ok(ExecuteResult {
            query_id,
            slot_token,
            output,
        })
    }

    fn deliver_outcome(&mut self, outcome: ExecutionOutcome<ExecuteResult>) {
        tracing::debug!(
            caller = %self.args.calling_package,
            outcome = %describe(&outcome),
            "returning app request result"
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

async fn log_query(
    services: &FlowServices,
    package: &str,
    output: &ExecuteOutput,
) -> Result<Option<i64>, FlowError> {
    if !services.flags.measurement_enabled {
        tracing::debug!(package = %package, "measurement disabled, dropping request log");
        return Ok(None);
    }
    let record = RequestLogRecord {
        service_package: package.to_string(),
        task_name: FlowKind::AppRequest.task_name().to_string(),
        rows: output.request_log.clone(),
    };
    services
        .log_store
        .persist_request(record)
        .await
        .map(Some)
        .map_err(FlowError::Extraction)
}
