use super::{
    describe, metrics_upload, DataAccessScope, DataPermission, PARAM_DATA_ACCESS, PARAM_INPUT,
    PARAM_MODEL_SERVICE, RESULT_KEY,
};
use crate::services::{FlowServices, VendorDataRow};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use isoflow_core::{
    CallbackSlot, ExecutionOutcome, FlowCallback, FlowDefinition, FlowError, FlowKind,
    MetricsUpload, ParameterMap, ReadinessReason, ResultMap, RunResult, ServiceHandle, Value,
    WorkerTarget,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

const API_NAME: &str = "service_on_download_completed";

/// Sync tokens must land on an hour boundary.
pub const SYNC_TOKEN_INTERVAL: i64 = 3600;

/// Construction arguments of a vendor data download job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArgs {
    pub package: String,
    /// The downloaded JSON document, `{"syncToken": N, "contents": [...]}`.
    pub document: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadDocument {
    #[serde(default)]
    sync_token: Option<i64>,
    #[serde(default)]
    contents: Vec<DownloadEntry>,
}

#[derive(Debug, Deserialize)]
struct DownloadEntry {
    key: Option<String>,
    data: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

impl DownloadEntry {
    /// Decoded entry, or `None` when it is incomplete or uses an unknown
    /// encoding.
    fn decode(self) -> anyhow::Result<Option<VendorDataRow>> {
        let (Some(key), Some(data)) = (self.key, self.data) else {
            return Ok(None);
        };
        let encoding = self.encoding.as_deref().map(str::trim).unwrap_or_default();
        let data = if encoding.is_empty() || encoding.eq_ignore_ascii_case("utf8") {
            data.into_bytes()
        } else if encoding.eq_ignore_ascii_case("base64") {
            STANDARD
                .decode(data.as_bytes())
                .with_context(|| format!("entry '{key}' is not valid base64"))?
        } else {
            tracing::debug!(
                key = %key,
                encoding = %encoding,
                "skipping entry with unknown encoding"
            );
            return Ok(None);
        };
        Ok(Some(VendorDataRow { key, data }))
    }
}

/// A validated download, ready to hand to the vendor service.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingDownload {
    sync_token: i64,
    contents: BTreeMap<String, Vec<u8>>,
}

/// Parse and check the downloaded document. Later entries win on
/// duplicate keys.
fn parse_document(document: &str) -> anyhow::Result<PendingDownload> {
    let parsed: DownloadDocument =
        serde_json::from_str(document).context("Failed to parse downloaded document")?;

    let sync_token = match parsed.sync_token {
        Some(token) if token >= 0 && token % SYNC_TOKEN_INTERVAL == 0 => token,
        other => return Err(anyhow!("invalid sync token {other:?}")),
    };

    let mut contents = BTreeMap::new();
    for entry in parsed.contents {
        if let Some(row) = entry.decode()? {
            contents.insert(row.key, row.data);
        }
    }
    if contents.is_empty() {
        return Err(anyhow!("download has no content"));
    }

    Ok(PendingDownload {
        sync_token,
        contents,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DownloadInput {
    downloaded: BTreeMap<String, Vec<u8>>,
}

/// Output record the vendor service writes under [`RESULT_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutput {
    #[serde(default)]
    pub retained_keys: Option<Vec<String>>,
}

/// Payload delivered to the caller once the retained entries are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadCompleted {
    pub retained_keys: Option<Vec<String>>,
    pub sync_token: i64,
    /// Entries written to the vendor data store.
    pub stored: usize,
}

pub struct DownloadFlow {
    args: DownloadArgs,
    services: Arc<FlowServices>,
    callback: CallbackSlot<DownloadCompleted>,
    started: Option<Instant>,
    service: Option<WorkerTarget>,
    pending: Option<PendingDownload>,
    model: Option<ServiceHandle>,
}

impl DownloadFlow {
    pub fn new(
        args: DownloadArgs,
        services: Arc<FlowServices>,
        callback: Box<dyn FlowCallback<DownloadCompleted>>,
    ) -> Self {
        Self {
            args,
            services,
            callback: CallbackSlot::new(callback),
            started: None,
            service: None,
            pending: None,
            model: None,
        }
    }

    async fn prepare(&mut self) -> Result<(), ReadinessReason> {
        if self.args.package.trim().is_empty() {
            return Err(ReadinessReason::InvalidArguments);
        }
        let pending = parse_document(&self.args.document).map_err(|e| {
            tracing::debug!(package = %self.args.package, error = %e, "download rejected");
            ReadinessReason::InvalidArguments
        })?;

        let class = self
            .services
            .manifests
            .service_class(&self.args.package)
            .ok_or(ReadinessReason::ServiceNotFound)?;

        let store = self.services.vendor_data.clone();
        let existing = store.sync_token(&self.args.package).await.map_err(|e| {
            tracing::warn!(package = %self.args.package, error = %e, "sync token lookup failed");
            ReadinessReason::InvalidArguments
        })?;
        if let Some(existing) = existing.filter(|t| *t >= pending.sync_token) {
            tracing::debug!(
                package = %self.args.package,
                existing,
                downloaded = pending.sync_token,
                "sync token is stale"
            );
            return Err(ReadinessReason::InvalidArguments);
        }

        self.service = Some(WorkerTarget::new(self.args.package.clone(), class));
        self.pending = Some(pending);
        Ok(())
    }
}

#[async_trait]
impl FlowDefinition for DownloadFlow {
    type Output = DownloadCompleted;

    fn kind(&self) -> FlowKind {
        FlowKind::Download
    }

    async fn is_ready(&mut self) -> bool {
        self.started = Some(Instant::now());
        match self.prepare().await {
            Ok(()) => true,
            Err(reason) => {
                tracing::info!(package = %self.args.package, %reason, "download job rejected");
                self.callback.fail(FlowError::Readiness(reason).code());
                false
            }
        }
    }

    fn target_worker(&self) -> WorkerTarget {
        self.service
            .clone()
            .unwrap_or_else(|| WorkerTarget::new(self.args.package.clone(), ""))
    }

    async fn build_parameters(&mut self) -> Result<ParameterMap, FlowError> {
        let pending = self
            .pending
            .as_ref()
            .ok_or_else(|| FlowError::Parameters(anyhow!("no validated download")))?;
        let scope = DataAccessScope {
            service_package: self.args.package.clone(),
            local_data: DataPermission::ReadWrite,
            event_data: DataPermission::ReadOnly,
        };
        let input = DownloadInput {
            downloaded: pending.contents.clone(),
        };

        let model_service = self.services.model_service.clone();
        let model = model_service
            .bind(&self.args.package)
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
            &self.args.package,
            self.started,
            run,
        ))
    }

    async fn extract_result(
        &mut self,
        mut results: ResultMap,
    ) -> Result<DownloadCompleted, FlowError> {
        let output: DownloadOutput = results
            .take_record(RESULT_KEY)
            .map_err(FlowError::Extraction)?;
        let pending = self
            .pending
            .take()
            .ok_or_else(|| FlowError::Extraction(anyhow!("no validated download")))?;

        let Some(retained_keys) = output.retained_keys else {
            return Ok(DownloadCompleted {
                retained_keys: None,
                sync_token: pending.sync_token,
                stored: 0,
            });
        };

        let mut contents = pending.contents;
        let rows: Vec<VendorDataRow> = retained_keys
            .iter()
            .filter_map(|key| {
                contents.remove(key).map(|data| VendorDataRow {
                    key: key.clone(),
                    data,
                })
            })
            .collect();
        let stored = rows.len();

        let store = self.services.vendor_data.clone();
        store
            .replace(&self.args.package, rows, &retained_keys, pending.sync_token)
            .await
            .map_err(FlowError::Extraction)?;
        tracing::debug!(package = %self.args.package, stored, "vendor data stored");

        Ok(DownloadCompleted {
            retained_keys: Some(retained_keys),
            sync_token: pending.sync_token,
            stored,
        })
    }

    fn deliver_outcome(&mut self, outcome: ExecutionOutcome<DownloadCompleted>) {
        tracing::debug!(
            package = %self.args.package,
            outcome = %describe(&outcome),
            "returning download result"
        );
        self.callback.deliver(outcome);
    }

    async fn cleanup(&mut self) {
        if let Some(model) = self.model.take() {
            if let Err(e) = self.services.model_service.unbind(model).await {
                tracing::warn!(
                    package = %self.args.package,
                    error = %e,
                    "failed to unbind model service"
                );
            }
        }
    }
}
