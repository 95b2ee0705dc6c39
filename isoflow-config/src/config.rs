use isoflow_core::{FlowKind, FlowKindTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Complete orchestrator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub deadlines: DeadlineSection,
    #[serde(default)]
    pub flags: FlagSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Background pool and executor limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSection {
    /// `None` admits every flow immediately.
    #[serde(default)]
    pub max_concurrent_flows: Option<usize>,
    #[serde(default = "default_extraction_timeout_ms")]
    pub extraction_timeout_ms: u64,
}

impl RuntimeSection {
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            max_concurrent_flows: None,
            extraction_timeout_ms: default_extraction_timeout_ms(),
        }
    }
}

fn default_extraction_timeout_ms() -> u64 {
    10_000
}

/// Per-kind run deadlines, in whole seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineSection {
    #[serde(default = "default_deadline_seconds")]
    pub default_seconds: u64,
    #[serde(default)]
    pub overrides: HashMap<FlowKind, u64>,
}

impl DeadlineSection {
    /// Build the process-wide kind table from this section.
    pub fn kind_table(&self) -> FlowKindTable {
        let overrides = self
            .overrides
            .iter()
            .map(|(kind, secs)| (*kind, Duration::from_secs(*secs)))
            .collect();
        FlowKindTable::with_overrides(Duration::from_secs(self.default_seconds), &overrides)
    }
}

impl Default for DeadlineSection {
    fn default() -> Self {
        Self {
            default_seconds: default_deadline_seconds(),
            overrides: HashMap::new(),
        }
    }
}

fn default_deadline_seconds() -> u64 {
    FlowKindTable::DEFAULT_DEADLINE.as_secs()
}

/// Feature flags consulted by readiness checks and result extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSection {
    #[serde(default)]
    pub global_kill_switch: bool,
    #[serde(default = "default_true")]
    pub measurement_enabled: bool,
    #[serde(default = "default_true")]
    pub targeting_enabled: bool,
    #[serde(default)]
    pub validate_output: bool,
}

impl Default for FlagSection {
    fn default() -> Self {
        Self {
            global_kill_switch: false,
            measurement_enabled: true,
            targeting_enabled: true,
            validate_output: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Tracing subscriber settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}
