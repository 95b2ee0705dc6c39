//! Concrete flow definitions for the request kinds the dispatcher knows.

mod app_request;
mod download;
mod render;
mod web_trigger;
mod web_view;

pub use app_request::{AppRequestArgs, AppRequestFlow, ExecuteOutput, ExecuteResult};
pub use download::{
    DownloadArgs, DownloadCompleted, DownloadFlow, DownloadOutput, SYNC_TOKEN_INTERVAL,
};
pub use render::{RenderArgs, RenderFlow, RenderInput, RenderOutput, RenderedSurface};
pub use web_trigger::{TriggerAck, WebTriggerArgs, WebTriggerFlow, WebTriggerOutput};
pub use web_view::{EventLogEntry, EventOutput, WebViewArgs, WebViewFlow, WebViewResult};

use crate::services::{ApiCallStats, FlowServices, ManifestResolver};
use isoflow_core::{ExecutionOutcome, MetricsUpload, ReadinessReason, RunResult, WorkerTarget};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Parameter key of the operation input record.
pub const PARAM_INPUT: &str = "input";
/// Parameter key of the data-access scope record.
pub const PARAM_DATA_ACCESS: &str = "data_access";
pub const PARAM_MODEL_SERVICE: &str = "model_service";
/// Result key the worker writes its output record under.
pub const RESULT_KEY: &str = "result";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPermission {
    None,
    ReadOnly,
    ReadWrite,
}

/// What the worker may read or write while it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAccessScope {
    pub service_package: String,
    pub local_data: DataPermission,
    pub event_data: DataPermission,
}

impl DataAccessScope {
    pub fn read_only(service_package: &str) -> Self {
        Self {
            service_package: service_package.to_string(),
            local_data: DataPermission::ReadOnly,
            event_data: DataPermission::ReadOnly,
        }
    }
}

/// Check that the package's manifest declares exactly the requested class.
pub(crate) fn check_manifest(
    manifests: &dyn ManifestResolver,
    target: &WorkerTarget,
) -> Result<(), ReadinessReason> {
    match manifests.service_class(&target.package) {
        Some(class) if class == target.class => Ok(()),
        Some(_) => Err(ReadinessReason::ManifestMisconfigured),
        None => Err(ReadinessReason::ServiceNotFound),
    }
}

/// Detached upload of one call's latency and status.
pub(crate) fn metrics_upload(
    services: &FlowServices,
    api_name: &str,
    package: &str,
    started: Option<Instant>,
    run: &RunResult,
) -> MetricsUpload {
    let response_code = match run {
        Ok(_) => ApiCallStats::STATUS_SUCCESS,
        Err(err) => err.code().status_code(),
    };
    let latency = started.map(|t| t.elapsed()).unwrap_or_default();
    let stats = ApiCallStats::new(api_name, package, latency, response_code);
    let metrics = services.metrics.clone();
    Box::pin(async move { metrics.record(stats).await })
}

pub(crate) fn describe<T>(outcome: &ExecutionOutcome<T>) -> String {
    match outcome {
        ExecutionOutcome::Success(_) => "success".to_string(),
        ExecutionOutcome::Failure(code) => code.to_string(),
    }
}
