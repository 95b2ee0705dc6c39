//! Collaborators the concrete flows depend on, injected once at start.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use isoflow_config::FlagSection;
use isoflow_core::{ServiceHandle, WorkerRunner, WorkerTarget};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Latency and status of one call into a vendor service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCallStats {
    pub api_name: String,
    pub package: String,
    pub latency_ms: u64,
    pub response_code: i32,
}

impl ApiCallStats {
    pub const STATUS_SUCCESS: i32 = 0;

    pub fn new(api_name: &str, package: &str, latency: Duration, response_code: i32) -> Self {
        Self {
            api_name: api_name.to_string(),
            package: package.to_string(),
            latency_ms: latency.as_millis() as u64,
            response_code,
        }
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, stats: ApiCallStats) -> Result<()>;
}

/// Emits call stats as tracing events.
#[derive(Debug, Default)]
pub struct TracingMetricsSink;

#[async_trait]
impl MetricsSink for TracingMetricsSink {
    async fn record(&self, stats: ApiCallStats) -> Result<()> {
        tracing::info!(
            api = %stats.api_name,
            package = %stats.package,
            latency_ms = stats.latency_ms,
            response_code = stats.response_code,
            "api call stats"
        );
        Ok(())
    }
}

/// A request log written after a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogRecord {
    pub service_package: String,
    pub task_name: String,
    pub rows: Vec<serde_json::Value>,
}

/// An event row tied to an earlier request log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub query_id: i64,
    pub service_package: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist a request log and return its query id.
    async fn persist_request(&self, record: RequestLogRecord) -> Result<i64>;

    async fn persist_events(&self, events: Vec<EventRecord>) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    next_query_id: AtomicI64,
    requests: Mutex<Vec<(i64, RequestLogRecord)>>,
    events: Mutex<Vec<EventRecord>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<(i64, RequestLogRecord)> {
        self.requests
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn persist_request(&self, record: RequestLogRecord) -> Result<i64> {
        let query_id = self.next_query_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.requests
            .lock()
            .map_err(|_| anyhow!("request log table poisoned"))?
            .push((query_id, record));
        Ok(query_id)
    }

    async fn persist_events(&self, events: Vec<EventRecord>) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("event table poisoned"))?
            .extend(events);
        Ok(())
    }
}

/// One downloaded vendor data entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorDataRow {
    pub key: String,
    pub data: Vec<u8>,
}

/// Vendor data pulled in by download jobs, partitioned per service package.
#[async_trait]
pub trait VendorDataStore: Send + Sync {
    /// Sync token of the last stored download, `None` before the first one.
    async fn sync_token(&self, package: &str) -> Result<Option<i64>>;

    /// Upsert `rows`, drop every key not in `retained_keys` and record
    /// `sync_token`, all at once.
    async fn replace(
        &self,
        package: &str,
        rows: Vec<VendorDataRow>,
        retained_keys: &[String],
        sync_token: i64,
    ) -> Result<()>;
}

#[derive(Debug, Default)]
struct VendorPartition {
    sync_token: Option<i64>,
    rows: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct InMemoryVendorDataStore {
    partitions: Mutex<HashMap<String, VendorPartition>>,
}

impl InMemoryVendorDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored entries of a package, ordered by key.
    pub fn rows(&self, package: &str) -> Vec<VendorDataRow> {
        self.partitions
            .lock()
            .ok()
            .and_then(|partitions| {
                partitions.get(package).map(|partition| {
                    partition
                        .rows
                        .iter()
                        .map(|(key, data)| VendorDataRow {
                            key: key.clone(),
                            data: data.clone(),
                        })
                        .collect()
                })
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl VendorDataStore for InMemoryVendorDataStore {
    async fn sync_token(&self, package: &str) -> Result<Option<i64>> {
        let partitions = self
            .partitions
            .lock()
            .map_err(|_| anyhow!("vendor data table poisoned"))?;
        Ok(partitions.get(package).and_then(|p| p.sync_token))
    }

    async fn replace(
        &self,
        package: &str,
        rows: Vec<VendorDataRow>,
        retained_keys: &[String],
        sync_token: i64,
    ) -> Result<()> {
        let mut partitions = self
            .partitions
            .lock()
            .map_err(|_| anyhow!("vendor data table poisoned"))?;
        let partition = partitions.entry(package.to_string()).or_default();
        partition.rows.retain(|key, _| retained_keys.contains(key));
        for row in rows {
            partition.rows.insert(row.key, row.data);
        }
        partition.sync_token = Some(sync_token);
        Ok(())
    }
}

/// Opaque reference to a slot result, handed to the app and redeemed by a
/// later render request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotToken {
    pub query_id: Option<i64>,
    pub service_package: String,
    pub slot_index: u32,
    pub rendering_keys: Vec<String>,
}

pub trait TokenCodec: Send + Sync {
    fn encode(&self, token: &SlotToken) -> Result<String>;

    fn decode(&self, raw: &str) -> Result<SlotToken>;
}

/// Plain JSON tokens; no confidentiality.
#[derive(Debug, Default)]
pub struct JsonTokenCodec;

impl TokenCodec for JsonTokenCodec {
    fn encode(&self, token: &SlotToken) -> Result<String> {
        serde_json::to_string(token).context("Failed to encode slot token")
    }

    fn decode(&self, raw: &str) -> Result<SlotToken> {
        serde_json::from_str(raw).context("Failed to decode slot token")
    }
}

/// Looks up the service class a package declares in its manifest.
pub trait ManifestResolver: Send + Sync {
    fn service_class(&self, package: &str) -> Option<String>;
}

#[derive(Debug, Default, Clone)]
pub struct StaticManifest {
    entries: HashMap<String, String>,
}

impl StaticManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, package: impl Into<String>, class: impl Into<String>) -> Self {
        self.entries.insert(package.into(), class.into());
        self
    }

    pub fn declare(mut self, target: &WorkerTarget) -> Self {
        self.entries
            .insert(target.package.clone(), target.class.clone());
        self
    }
}

impl ManifestResolver for StaticManifest {
    fn service_class(&self, package: &str) -> Option<String> {
        self.entries.get(package).cloned()
    }
}

/// Auxiliary service bound for the duration of one flow.
#[async_trait]
pub trait ModelServiceProvider: Send + Sync {
    async fn bind(&self, package: &str) -> Result<ServiceHandle>;

    async fn unbind(&self, handle: ServiceHandle) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct NoopModelService;

/// Marker transport handed out by [`NoopModelService`].
#[derive(Debug)]
pub struct NoopModel {
    pub package: String,
}

#[async_trait]
impl ModelServiceProvider for NoopModelService {
    async fn bind(&self, package: &str) -> Result<ServiceHandle> {
        Ok(ServiceHandle::new(
            "model_service",
            Arc::new(NoopModel {
                package: package.to_string(),
            }),
        ))
    }

    async fn unbind(&self, _handle: ServiceHandle) -> Result<()> {
        Ok(())
    }
}

/// Everything the concrete flows need, built once and shared.
#[derive(Clone)]
pub struct FlowServices {
    pub runner: Arc<dyn WorkerRunner>,
    pub metrics: Arc<dyn MetricsSink>,
    pub log_store: Arc<dyn LogStore>,
    pub tokens: Arc<dyn TokenCodec>,
    pub manifests: Arc<dyn ManifestResolver>,
    pub model_service: Arc<dyn ModelServiceProvider>,
    pub vendor_data: Arc<dyn VendorDataStore>,
    pub flags: FlagSection,
}

impl FlowServices {
    pub fn builder(runner: Arc<dyn WorkerRunner>) -> FlowServicesBuilder {
        FlowServicesBuilder {
            runner,
            metrics: None,
            log_store: None,
            tokens: None,
            manifests: None,
            model_service: None,
            vendor_data: None,
            flags: FlagSection::default(),
        }
    }
}

impl fmt::Debug for FlowServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowServices")
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

pub struct FlowServicesBuilder {
    runner: Arc<dyn WorkerRunner>,
    metrics: Option<Arc<dyn MetricsSink>>,
    log_store: Option<Arc<dyn LogStore>>,
    tokens: Option<Arc<dyn TokenCodec>>,
    manifests: Option<Arc<dyn ManifestResolver>>,
    model_service: Option<Arc<dyn ModelServiceProvider>>,
    vendor_data: Option<Arc<dyn VendorDataStore>>,
    flags: FlagSection,
}

impl FlowServicesBuilder {
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn log_store(mut self, log_store: Arc<dyn LogStore>) -> Self {
        self.log_store = Some(log_store);
        self
    }

    pub fn tokens(mut self, tokens: Arc<dyn TokenCodec>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn manifests(mut self, manifests: Arc<dyn ManifestResolver>) -> Self {
        self.manifests = Some(manifests);
        self
    }

    pub fn model_service(mut self, model_service: Arc<dyn ModelServiceProvider>) -> Self {
        self.model_service = Some(model_service);
        self
    }

    pub fn vendor_data(mut self, vendor_data: Arc<dyn VendorDataStore>) -> Self {
        self.vendor_data = Some(vendor_data);
        self
    }

    pub fn flags(mut self, flags: FlagSection) -> Self {
        self.flags = flags;
        self
    }

    pub fn build(self) -> FlowServices {
        FlowServices {
            runner: self.runner,
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(TracingMetricsSink)),
            log_store: self
                .log_store
                .unwrap_or_else(|| Arc::new(InMemoryLogStore::new())),
            tokens: self.tokens.unwrap_or_else(|| Arc::new(JsonTokenCodec)),
            manifests: self
                .manifests
                .unwrap_or_else(|| Arc::new(StaticManifest::new())),
            model_service: self
                .model_service
                .unwrap_or_else(|| Arc::new(NoopModelService)),
            vendor_data: self
                .vendor_data
                .unwrap_or_else(|| Arc::new(InMemoryVendorDataStore::new())),
            flags: self.flags,
        }
    }
}
