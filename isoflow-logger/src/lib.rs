//! # Isoflow Logger
//!
//! Subscriber setup and execution summaries for isoflow flows

use isoflow_config::LoggingConfig;
use isoflow_context::{FlowTrace, StageStatus};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Logger bound to one trace id
pub struct Logger {
    pub trace_id: String,
}

impl Logger {
    pub fn with_trace_id(trace_id: String) -> Self {
        Self { trace_id }
    }

    /// Initialize tracing subscriber from `RUST_LOG`
    pub fn init_tracing() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    /// Initialize tracing subscriber from configuration.
    ///
    /// Fails if the filter does not parse or a global subscriber is already set.
    pub fn init_with(config: &LoggingConfig) -> anyhow::Result<()> {
        let filter = EnvFilter::try_new(&config.filter)
            .map_err(|e| anyhow::anyhow!("invalid log filter '{}': {e}", config.filter))?;
        let result = if config.json {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .try_init()
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).try_init()
        };
        result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
    }

    pub fn info(&self, message: &str) {
        info!(trace_id = %self.trace_id, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        warn!(trace_id = %self.trace_id, "{}", message);
    }

    pub fn error(&self, message: &str) {
        error!(trace_id = %self.trace_id, "{}", message);
    }

    pub fn debug(&self, message: &str) {
        debug!(trace_id = %self.trace_id, "{}", message);
    }

    /// Log a one-line summary of a finished execution
    pub fn log_trace_summary(trace: &FlowTrace) {
        let summary = TraceSummary::from(trace);

        if trace.ok {
            info!(
                trace_id = %trace.trace_id,
                task = %trace.task_name,
                stages = summary.total,
                success = summary.success,
                skipped = summary.skipped,
                elapsed_ms = trace.elapsed().as_millis() as u64,
                "Flow execution summary"
            );
        } else {
            warn!(
                trace_id = %trace.trace_id,
                task = %trace.task_name,
                stages = summary.total,
                success = summary.success,
                failed = summary.failed,
                timeout = summary.timeout,
                skipped = summary.skipped,
                errors = trace.errors.len(),
                elapsed_ms = trace.elapsed().as_millis() as u64,
                "Flow execution summary"
            );
            for err in &trace.errors {
                error!(trace_id = %trace.trace_id, "Flow error: {}", err);
            }
        }
    }

    /// Log every stage of an execution at its own level
    pub fn log_stage_details(trace: &FlowTrace) {
        for log in &trace.stage_logs {
            let duration_ms = log.duration().unwrap_or_default().as_millis() as u64;
            match log.status {
                StageStatus::Success => {
                    debug!(
                        trace_id = %trace.trace_id,
                        stage = %log.stage,
                        duration_ms,
                        "Stage completed"
                    );
                }
                StageStatus::Failed => {
                    error!(
                        trace_id = %trace.trace_id,
                        stage = %log.stage,
                        duration_ms,
                        error = %log.error_message.as_deref().unwrap_or("Unknown error"),
                        "Stage failed"
                    );
                }
                StageStatus::Skipped => {
                    debug!(
                        trace_id = %trace.trace_id,
                        stage = %log.stage,
                        reason = %log.error_message.as_deref().unwrap_or(""),
                        "Stage skipped"
                    );
                }
                StageStatus::Timeout => {
                    error!(
                        trace_id = %trace.trace_id,
                        stage = %log.stage,
                        duration_ms,
                        "Stage timed out"
                    );
                }
                StageStatus::Running => {
                    warn!(trace_id = %trace.trace_id, stage = %log.stage, "Stage still running");
                }
            }
        }
    }
}

/// Stage counts of one trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timeout: usize,
}

impl From<&FlowTrace> for TraceSummary {
    fn from(trace: &FlowTrace) -> Self {
        Self {
            total: trace.stage_logs.len(),
            success: trace.count(StageStatus::Success),
            failed: trace.count(StageStatus::Failed),
            skipped: trace.count(StageStatus::Skipped),
            timeout: trace.count(StageStatus::Timeout),
        }
    }
}
